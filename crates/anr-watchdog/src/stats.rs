//! Watchdog activity counters.
//!
//! Counters are updated from the clock thread and read from anywhere, so
//! they are plain atomics with `Relaxed` ordering; a snapshot is eventually
//! consistent, not a transaction.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::EventKind;

/// Point-in-time copy of [`WatchdogStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchdogStatsSnapshot {
    /// Clock ticks processed.
    pub ticks: u64,
    /// Heartbeat tokens posted.
    pub tokens_posted: u64,
    /// Failed token posts.
    pub probe_failures: u64,
    /// Blocked events emitted.
    pub blocked_events: u64,
    /// ANR events emitted.
    pub anr_events: u64,
    /// Info events emitted.
    pub info_events: u64,
    /// Incidents that ended with the context responding again.
    pub recoveries: u64,
    /// Subscriber deliveries that failed.
    pub subscriber_failures: u64,
}

/// Lock-free watchdog counters.
#[derive(Debug, Default)]
pub struct WatchdogStats {
    ticks: AtomicU64,
    tokens_posted: AtomicU64,
    probe_failures: AtomicU64,
    blocked_events: AtomicU64,
    anr_events: AtomicU64,
    info_events: AtomicU64,
    recoveries: AtomicU64,
    subscriber_failures: AtomicU64,
}

impl WatchdogStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a clock tick.
    pub fn inc_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a posted token.
    pub fn inc_token_posted(&self) {
        self.tokens_posted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed post.
    pub fn inc_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an ended incident.
    pub fn inc_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an emitted event and its failed deliveries.
    pub fn record_event(&self, kind: EventKind, failed_deliveries: usize) {
        let counter = match kind {
            EventKind::Blocked => &self.blocked_events,
            EventKind::Anr => &self.anr_events,
            EventKind::Info => &self.info_events,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if failed_deliveries > 0 {
            self.subscriber_failures.fetch_add(
                u64::try_from(failed_deliveries).unwrap_or(u64::MAX),
                Ordering::Relaxed,
            );
        }
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> WatchdogStatsSnapshot {
        WatchdogStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tokens_posted: self.tokens_posted.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            blocked_events: self.blocked_events.load(Ordering::Relaxed),
            anr_events: self.anr_events.load(Ordering::Relaxed),
            info_events: self.info_events.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = WatchdogStats::new();
        assert_eq!(stats.snapshot(), WatchdogStatsSnapshot::default());
    }

    #[test]
    fn test_record_event_by_kind() {
        let stats = WatchdogStats::new();
        stats.record_event(EventKind::Blocked, 0);
        stats.record_event(EventKind::Blocked, 2);
        stats.record_event(EventKind::Anr, 0);
        stats.record_event(EventKind::Info, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.blocked_events, 2);
        assert_eq!(snapshot.anr_events, 1);
        assert_eq!(snapshot.info_events, 1);
        assert_eq!(snapshot.subscriber_failures, 3);
    }

    #[test]
    fn test_tick_and_probe_counters() {
        let stats = WatchdogStats::new();
        stats.inc_tick();
        stats.inc_tick();
        stats.inc_token_posted();
        stats.inc_probe_failure();
        stats.inc_recovery();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.tokens_posted, 1);
        assert_eq!(snapshot.probe_failures, 1);
        assert_eq!(snapshot.recoveries, 1);
    }
}
