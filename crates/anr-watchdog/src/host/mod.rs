//! Host binding: the capability set the watchdog consumes from its host.
//!
//! The watchdog never touches the monitored thread directly. Everything it
//! needs (posting work onto the context's queue, capturing diagnostics,
//! querying foreground state) goes through a [`HostBinding`].

mod queue;

pub use queue::QueueContext;

use std::fmt;
use std::sync::Arc;

use crate::error::{WatchdogError, WatchdogResult};
use crate::probe::HeartbeatToken;

/// Work scheduled onto the monitored context.
pub type ContextTask = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to a bound monitored context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    id: u64,
    name: Arc<str>,
}

impl ContextHandle {
    /// Create a handle. Hosts choose ids that are unique among their contexts.
    #[must_use]
    pub fn new(id: u64, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Host-assigned identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human-readable context name, used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Capabilities provided by the host runtime that owns the monitored context.
///
/// Implementations must never block the caller on the monitored context:
/// `post_token` and `post_task` only enqueue, and `capture_diagnostic_report`
/// must work while the context is stalled.
pub trait HostBinding: fmt::Debug + Send + Sync {
    /// Bind the monitored context.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ProbeUnavailable`] if the context cannot be reached.
    fn bind_monitored_context(&self) -> WatchdogResult<ContextHandle>;

    /// Enqueue a heartbeat token. The context must call
    /// [`HeartbeatToken::acknowledge`] when it processes the token.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ProbeUnavailable`] if the queue is unreachable.
    fn post_token(&self, context: &ContextHandle, token: HeartbeatToken) -> WatchdogResult<()>;

    /// Capture a diagnostic report for a stalled context.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::DiagnosticCaptureFailed`] if no report can be produced.
    fn capture_diagnostic_report(&self, context: &ContextHandle) -> WatchdogResult<String>;

    /// Whether the application is currently in the foreground.
    fn is_foreground(&self) -> bool;

    /// Enqueue arbitrary work on the monitored context.
    ///
    /// Only needed for synthetic test incidents.
    ///
    /// # Errors
    ///
    /// The default implementation returns [`WatchdogError::Unsupported`].
    fn post_task(&self, context: &ContextHandle, task: ContextTask) -> WatchdogResult<()> {
        drop(task);
        Err(WatchdogError::unsupported(format!("post_task on {context}")))
    }
}

/// A bound context together with the host that owns it.
#[derive(Debug, Clone)]
pub struct MonitoredContext {
    host: Arc<dyn HostBinding>,
    handle: ContextHandle,
}

impl MonitoredContext {
    /// Bind the host's monitored context.
    ///
    /// # Errors
    ///
    /// Propagates the host's bind failure.
    pub fn bind(host: Arc<dyn HostBinding>) -> WatchdogResult<Self> {
        let handle = host.bind_monitored_context()?;
        tracing::debug!(context = %handle, "Monitored context bound");
        Ok(Self { host, handle })
    }

    /// The bound handle.
    #[must_use]
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// Post a heartbeat token onto the context.
    ///
    /// # Errors
    ///
    /// Propagates the host's post failure.
    pub fn post_token(&self, token: HeartbeatToken) -> WatchdogResult<()> {
        self.host.post_token(&self.handle, token)
    }

    /// Post arbitrary work onto the context.
    ///
    /// # Errors
    ///
    /// Propagates the host's post failure.
    pub fn post_task(&self, task: ContextTask) -> WatchdogResult<()> {
        self.host.post_task(&self.handle, task)
    }

    /// Capture a diagnostic report.
    ///
    /// # Errors
    ///
    /// Propagates the host's capture failure.
    pub fn capture_report(&self) -> WatchdogResult<String> {
        self.host.capture_diagnostic_report(&self.handle)
    }

    /// Fresh foreground reading from the host.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.host.is_foreground()
    }
}
