//! Error types for the ANR watchdog.
//!
//! None of these errors is fatal to the host process. The supervisor turns
//! the recoverable ones into [`InfoEvent`](crate::events::InfoEvent)s instead
//! of propagating them into the monitored application.

use thiserror::Error;

use crate::events::EventKind;

/// Errors that can occur during watchdog operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchdogError {
    /// The monitored context could not be bound or reached.
    #[error("Monitored context unavailable: {0}")]
    ProbeUnavailable(String),

    /// Diagnostic report generation failed during an ANR transition.
    #[error("Diagnostic capture failed: {0}")]
    DiagnosticCaptureFailed(String),

    /// A subscriber returned an error or panicked during delivery.
    #[error("Subscriber #{subscription} for {kind} events failed: {reason}")]
    SubscriberFailure {
        /// Event channel the subscriber was registered on.
        kind: EventKind,
        /// Subscription identifier.
        subscription: u64,
        /// Error or panic message.
        reason: String,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A diagnostic-only operation was requested with test mode disabled.
    #[error("Test mode is disabled; synthetic incidents are not allowed")]
    TestModeDisabled,

    /// The host binding does not implement an optional capability.
    #[error("Unsupported host operation: {0}")]
    Unsupported(String),

    /// The clock thread could not be spawned.
    #[error("Failed to spawn watchdog clock thread: {0}")]
    ClockSpawnFailed(String),

    /// A diagnostic report could not be encoded.
    #[error("Failed to encode diagnostic report: {0}")]
    ReportEncoding(String),
}

impl WatchdogError {
    /// Create a probe unavailable error.
    #[must_use]
    pub fn probe_unavailable(reason: impl Into<String>) -> Self {
        Self::ProbeUnavailable(reason.into())
    }

    /// Create a diagnostic capture failed error.
    #[must_use]
    pub fn diagnostic_capture_failed(reason: impl Into<String>) -> Self {
        Self::DiagnosticCaptureFailed(reason.into())
    }

    /// Create a subscriber failure error.
    #[must_use]
    pub fn subscriber_failure(kind: EventKind, subscription: u64, reason: impl Into<String>) -> Self {
        Self::SubscriberFailure {
            kind,
            subscription,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create an unsupported operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported(operation.into())
    }

    /// Returns `true` for errors the caller may retry after the host recovers.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProbeUnavailable(_) | Self::ClockSpawnFailed(_) | Self::DiagnosticCaptureFailed(_)
        )
    }
}

/// A specialized `Result` type for watchdog operations.
pub type WatchdogResult<T> = std::result::Result<T, WatchdogError>;
