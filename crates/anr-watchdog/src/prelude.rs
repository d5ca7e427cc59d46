//! Prelude for anr-watchdog.
//!
//! This module re-exports the most commonly used types for convenient importing.
//!
//! # Example
//!
//! ```rust
//! use anr_watchdog::prelude::*;
//! use std::sync::Arc;
//!
//! let queue = QueueContext::new("main");
//! let supervisor = WatchdogSupervisor::new(WatchdogConfig::default(), Arc::new(queue))?;
//! assert_eq!(supervisor.state(), WatchdogState::Stopped);
//! # Ok::<(), WatchdogError>(())
//! ```

pub use crate::classifier::IncidentState;
pub use crate::config::{WatchdogConfig, WatchdogConfigBuilder};
pub use crate::error::{WatchdogError, WatchdogResult};
pub use crate::events::{
    AnrEvent, BlockedEvent, EventKind, InfoEvent, SubscriberResult, SubscriptionId, WatchdogEvent,
};
pub use crate::host::{ContextHandle, HostBinding, QueueContext};
pub use crate::probe::HeartbeatToken;
pub use crate::stats::WatchdogStatsSnapshot;
pub use crate::supervisor::{WatchdogState, WatchdogSupervisor};
pub use crate::time::{ManualTime, MonotonicTime, TimeSource};
