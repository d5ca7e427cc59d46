//! Emitted events and the subscriber registry.
//!
//! Three independent channels (blocked, ANR, info). Delivery is synchronous
//! on the publishing thread, in registration order. A subscriber that returns
//! an error or panics is isolated: the remaining subscribers still receive
//! the event and the failure is republished as an [`InfoEvent`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::WatchdogError;

/// The monitored context has been unresponsive past a soft threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockedEvent {
    /// Whole seconds without an acknowledgement.
    pub blocked_duration_seconds: u64,
    /// Foreground state at classification time.
    pub is_foreground: bool,
}

/// A confirmed ANR: the context stayed unresponsive past the hard threshold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnrEvent {
    /// Diagnostic report captured for this incident.
    pub report: String,
    /// Whole seconds without an acknowledgement.
    pub blocked_duration_seconds: u64,
    /// Foreground state at classification time.
    pub is_foreground: bool,
}

/// Auxiliary diagnostic notice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InfoEvent {
    /// Notice text.
    pub message: String,
}

impl InfoEvent {
    /// Create an info event.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Event channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// [`BlockedEvent`] channel.
    Blocked,
    /// [`AnrEvent`] channel.
    Anr,
    /// [`InfoEvent`] channel.
    Info,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Blocked => write!(f, "blocked"),
            EventKind::Anr => write!(f, "anr"),
            EventKind::Info => write!(f, "info"),
        }
    }
}

/// Any event the watchdog emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchdogEvent {
    /// Soft threshold crossing.
    Blocked(BlockedEvent),
    /// Hard threshold crossing.
    Anr(AnrEvent),
    /// Diagnostic notice.
    Info(InfoEvent),
}

impl WatchdogEvent {
    /// Channel this event is delivered on.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            WatchdogEvent::Blocked(_) => EventKind::Blocked,
            WatchdogEvent::Anr(_) => EventKind::Anr,
            WatchdogEvent::Info(_) => EventKind::Info,
        }
    }

    /// Shorthand for an info event.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        WatchdogEvent::Info(InfoEvent::new(message))
    }
}

/// Error type subscribers may return.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by subscriber callbacks.
pub type SubscriberResult = Result<(), SubscriberError>;

type Subscriber<E> = Arc<dyn Fn(&E) -> SubscriberResult + Send + Sync>;

/// Handle returned by `subscribe_*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

impl SubscriptionId {
    /// Channel of the subscription.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Numeric identifier, unique within one bus.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct SubscriberList<E> {
    kind: EventKind,
    entries: RwLock<Vec<(u64, Subscriber<E>)>>,
}

impl<E> SubscriberList<E> {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, id: u64, subscriber: Subscriber<E>) {
        self.entries.write().push((id, subscriber));
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Deliver to a snapshot of the list so subscribers may (un)subscribe
    /// or stop the watchdog without deadlocking on the registry lock.
    fn deliver(&self, event: &E, failures: &mut Vec<WatchdogError>) -> usize {
        let snapshot: Vec<(u64, Subscriber<E>)> = self
            .entries
            .read()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect();

        let mut delivered = 0;
        for (id, subscriber) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber(event)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            tracing::warn!(kind = %self.kind, subscription = id, %reason, "Event subscriber failed");
            failures.push(WatchdogError::subscriber_failure(self.kind, id, reason));
        }
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}

/// Outcome of publishing one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers that handled the event successfully.
    pub delivered: usize,
    /// Subscribers that failed, in delivery order.
    pub failures: Vec<WatchdogError>,
}

/// Per-kind subscriber registry.
pub struct EventBus {
    blocked: SubscriberList<BlockedEvent>,
    anr: SubscriberList<AnrEvent>,
    info: SubscriberList<InfoEvent>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocked: SubscriberList::new(EventKind::Blocked),
            anr: SubscriberList::new(EventKind::Anr),
            info: SubscriberList::new(EventKind::Info),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self, kind: EventKind) -> SubscriptionId {
        SubscriptionId {
            kind,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Subscribe to [`BlockedEvent`]s.
    pub fn subscribe_blocked<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&BlockedEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = self.next_id(EventKind::Blocked);
        self.blocked.push(id.id, Arc::new(subscriber));
        id
    }

    /// Subscribe to [`AnrEvent`]s.
    pub fn subscribe_anr<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&AnrEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = self.next_id(EventKind::Anr);
        self.anr.push(id.id, Arc::new(subscriber));
        id
    }

    /// Subscribe to [`InfoEvent`]s.
    pub fn subscribe_info<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&InfoEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = self.next_id(EventKind::Info);
        self.info.push(id.id, Arc::new(subscriber));
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        match subscription.kind {
            EventKind::Blocked => self.blocked.remove(subscription.id),
            EventKind::Anr => self.anr.remove(subscription.id),
            EventKind::Info => self.info.remove(subscription.id),
        }
    }

    /// Number of subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Blocked => self.blocked.len(),
            EventKind::Anr => self.anr.len(),
            EventKind::Info => self.info.len(),
        }
    }

    /// Deliver an event to every subscriber of its kind.
    ///
    /// Failures of blocked/ANR subscribers are republished as info events.
    /// Failures of info subscribers are only logged.
    pub fn publish(&self, event: &WatchdogEvent) -> Delivery {
        let mut failures = Vec::new();
        let delivered = match event {
            WatchdogEvent::Blocked(blocked) => self.blocked.deliver(blocked, &mut failures),
            WatchdogEvent::Anr(anr) => self.anr.deliver(anr, &mut failures),
            WatchdogEvent::Info(info) => self.info.deliver(info, &mut failures),
        };

        if event.kind() != EventKind::Info {
            let mut ignored = Vec::new();
            for failure in &failures {
                self.info
                    .deliver(&InfoEvent::new(failure.to_string()), &mut ignored);
            }
        }

        Delivery {
            delivered,
            failures,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("blocked_subscribers", &self.blocked.len())
            .field("anr_subscribers", &self.anr.len())
            .field("info_subscribers", &self.info.len())
            .finish()
    }
}
