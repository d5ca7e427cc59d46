//! # anr-watchdog
//!
//! Application-Not-Responding detection for a cooperative "main" execution
//! context, such as a UI thread that only makes progress while it drains its
//! own message queue.
//!
//! A heartbeat probe posts tokens onto the monitored context; an independent
//! clock thread measures how long it has been since the last token was
//! acknowledged; a classifier turns that into blocked and ANR events that are
//! reported exactly once per threshold crossing.
//!
//! ## Guarantees
//!
//! - **Never blocks on the monitored context**: the clock thread only reads
//!   atomics the context writes
//! - **One ANR per incident**, no matter how long the stall lasts
//! - **Subscriber isolation**: an erroring or panicking subscriber never
//!   prevents delivery to the others
//! - **No fatal errors**: failures degrade to info events
//!
//! ## Architecture
//!
//! - [`probe`] - Heartbeat tokens and the acknowledgement timestamp
//! - [`clock`] - Elapsed-time sampling and the clock thread
//! - [`classifier`] - Healthy / soft-blocked / hard-blocked state machine
//! - [`supervisor`] - Lifecycle, subscriptions, event emission
//! - [`host`] - Host binding trait and the bundled [`QueueContext`]
//! - [`events`] - Event types and the subscriber registry
//! - [`report`] - JSON diagnostic report layout
//! - [`config`], [`error`], [`stats`], [`time`] - Supporting types
//!
//! ## Example
//!
//! ```rust
//! use anr_watchdog::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = WatchdogConfig::builder()
//!     .soft_threshold_seconds(2)
//!     .hard_threshold_seconds(5)
//!     .poll_period(Duration::from_millis(500))
//!     .build()?;
//!
//! let main_queue = QueueContext::new("main");
//! let supervisor = WatchdogSupervisor::new(config, Arc::new(main_queue.clone()))?;
//! supervisor.subscribe_blocked(|event| {
//!     eprintln!("main thread blocked for {}s", event.blocked_duration_seconds);
//!     Ok(())
//! });
//!
//! supervisor.start();
//! // The host's main loop keeps draining its queue:
//! main_queue.run_pending();
//! supervisor.stop();
//! # Ok::<(), WatchdogError>(())
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod probe;
pub mod report;
pub mod stats;
pub mod supervisor;
pub mod time;

pub mod prelude;

pub use classifier::{IncidentClassifier, IncidentState, Thresholds, Verdict};
pub use clock::{ClockSample, ClockThread, WatchdogClock};
pub use config::{WatchdogConfig, WatchdogConfigBuilder};
pub use error::{WatchdogError, WatchdogResult};
pub use events::{
    AnrEvent, BlockedEvent, Delivery, EventBus, EventKind, InfoEvent, SubscriberError,
    SubscriberResult, SubscriptionId, WatchdogEvent,
};
pub use host::{ContextHandle, ContextTask, HostBinding, MonitoredContext, QueueContext};
pub use probe::{HeartbeatProbe, HeartbeatToken};
pub use report::{AnrReport, StackFrame, ThreadSnapshot};
pub use stats::{WatchdogStats, WatchdogStatsSnapshot};
pub use supervisor::{WatchdogState, WatchdogSupervisor};
pub use time::{ManualTime, MonotonicTime, TimeSource};
