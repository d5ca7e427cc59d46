//! Heartbeat probe.
//!
//! The probe posts [`HeartbeatToken`]s onto the monitored context. Each token
//! stamps the shared acknowledgement cell when the context processes it, so a
//! live context keeps advancing [`HeartbeatProbe::last_ack_timestamp`].
//!
//! The acknowledgement cell is two atomic words. The monitored context writes
//! them and the clock thread reads them; neither side ever waits on the other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::WatchdogResult;
use crate::host::MonitoredContext;
use crate::time::TimeSource;

/// Sentinel stored in the timestamp word before the first acknowledgement.
const NEVER: u64 = u64::MAX;

struct AckCell {
    last_ack_ms: AtomicU64,
    last_ack_sequence: AtomicU64,
    time: Arc<dyn TimeSource>,
}

impl AckCell {
    fn last_ack_ms(&self) -> Option<u64> {
        match self.last_ack_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Some(ms),
        }
    }

    fn record(&self, sequence: u64) {
        let now = self.time.now_ms().min(NEVER - 1);
        // A token acknowledged late must not move time backwards.
        let updated = self
            .last_ack_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current == NEVER || current < now).then_some(now)
            });
        if updated.is_err() {
            tracing::trace!(sequence, now_ms = now, "Stale heartbeat acknowledgement");
        }
        self.last_ack_sequence.fetch_max(sequence, Ordering::AcqRel);
    }
}

impl fmt::Debug for AckCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckCell")
            .field("last_ack_ms", &self.last_ack_ms())
            .field(
                "last_ack_sequence",
                &self.last_ack_sequence.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

/// A liveness token travelling through the monitored context's queue.
#[derive(Debug)]
#[must_use = "a token that is never acknowledged reads as a stalled context"]
pub struct HeartbeatToken {
    sequence: u64,
    issued_at_ms: u64,
    cell: Arc<AckCell>,
}

impl HeartbeatToken {
    /// Sequence number, starting at 1.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time the token was issued.
    #[must_use]
    pub fn issued_at_ms(&self) -> u64 {
        self.issued_at_ms
    }

    /// Record that the monitored context processed this token.
    pub fn acknowledge(self) {
        self.cell.record(self.sequence);
    }
}

/// Posts heartbeat tokens and exposes the last acknowledgement time.
#[derive(Debug)]
pub struct HeartbeatProbe {
    context: MonitoredContext,
    cell: Arc<AckCell>,
    started_at_ms: u64,
    next_sequence: u64,
    outstanding: Option<u64>,
}

impl HeartbeatProbe {
    /// Create a probe for a bound context. No token is posted yet.
    #[must_use]
    pub fn new(context: MonitoredContext, time: Arc<dyn TimeSource>) -> Self {
        let started_at_ms = time.now_ms();
        Self {
            context,
            cell: Arc::new(AckCell {
                last_ack_ms: AtomicU64::new(NEVER),
                last_ack_sequence: AtomicU64::new(0),
                time,
            }),
            started_at_ms,
            next_sequence: 1,
            outstanding: None,
        }
    }

    /// Issue a fresh token and post it, superseding any outstanding one.
    ///
    /// Returns the posted sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ProbeUnavailable`](crate::WatchdogError::ProbeUnavailable)
    /// if the context's queue cannot be reached.
    pub fn post_token(&mut self) -> WatchdogResult<u64> {
        let sequence = self.next_sequence;
        let token = HeartbeatToken {
            sequence,
            issued_at_ms: self.cell.time.now_ms(),
            cell: Arc::clone(&self.cell),
        };
        self.context.post_token(token)?;
        self.next_sequence = sequence.saturating_add(1);
        self.outstanding = Some(sequence);
        Ok(sequence)
    }

    /// Post a token only if the previous one has been acknowledged.
    ///
    /// A stalled context therefore holds at most one of our tokens.
    ///
    /// # Errors
    ///
    /// Same as [`post_token`](Self::post_token).
    pub fn post_if_idle(&mut self) -> WatchdogResult<Option<u64>> {
        if self.has_outstanding_token() {
            return Ok(None);
        }
        self.post_token().map(Some)
    }

    /// Whether a posted token is still waiting to be acknowledged.
    #[must_use]
    pub fn has_outstanding_token(&self) -> bool {
        self.outstanding
            .is_some_and(|sequence| self.last_acknowledged_sequence() < sequence)
    }

    /// Time of the most recent acknowledgement, or `None` if none yet.
    #[must_use]
    pub fn last_ack_timestamp(&self) -> Option<u64> {
        self.cell.last_ack_ms()
    }

    /// Highest acknowledged sequence number (0 if none).
    #[must_use]
    pub fn last_acknowledged_sequence(&self) -> u64 {
        self.cell.last_ack_sequence.load(Ordering::Acquire)
    }

    /// Time the probe was created; the stall baseline before any ack.
    #[must_use]
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// The monitored context this probe posts to.
    #[must_use]
    pub fn context(&self) -> &MonitoredContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchdogError;
    use crate::host::{ContextHandle, HostBinding};
    use crate::time::ManualTime;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct HoldingHost {
        held: Mutex<Vec<HeartbeatToken>>,
        unreachable: std::sync::atomic::AtomicBool,
    }

    impl HoldingHost {
        fn ack_all(&self) {
            for token in self.held.lock().drain(..) {
                token.acknowledge();
            }
        }
    }

    impl HostBinding for HoldingHost {
        fn bind_monitored_context(&self) -> WatchdogResult<ContextHandle> {
            Ok(ContextHandle::new(1, "main"))
        }

        fn post_token(&self, _context: &ContextHandle, token: HeartbeatToken) -> WatchdogResult<()> {
            if self.unreachable.load(Ordering::Acquire) {
                return Err(WatchdogError::probe_unavailable("queue gone"));
            }
            self.held.lock().push(token);
            Ok(())
        }

        fn capture_diagnostic_report(&self, _context: &ContextHandle) -> WatchdogResult<String> {
            Ok(String::new())
        }

        fn is_foreground(&self) -> bool {
            true
        }
    }

    fn probe_with(host: &Arc<HoldingHost>, time: &Arc<ManualTime>) -> WatchdogResult<HeartbeatProbe> {
        let binding: Arc<dyn HostBinding> = Arc::clone(host) as Arc<dyn HostBinding>;
        let context = MonitoredContext::bind(binding)?;
        Ok(HeartbeatProbe::new(context, Arc::clone(time) as Arc<dyn TimeSource>))
    }

    #[test]
    fn test_never_acknowledged_initially() -> WatchdogResult<()> {
        let host = Arc::new(HoldingHost::default());
        let time = Arc::new(ManualTime::new(500));
        let probe = probe_with(&host, &time)?;

        assert_eq!(probe.last_ack_timestamp(), None);
        assert_eq!(probe.started_at_ms(), 500);
        assert!(!probe.has_outstanding_token());
        Ok(())
    }

    #[test]
    fn test_acknowledge_records_completion_time() -> WatchdogResult<()> {
        let host = Arc::new(HoldingHost::default());
        let time = Arc::new(ManualTime::new(0));
        let mut probe = probe_with(&host, &time)?;

        assert_eq!(probe.post_token()?, 1);
        assert!(probe.has_outstanding_token());

        time.advance(Duration::from_millis(250));
        host.ack_all();

        assert_eq!(probe.last_ack_timestamp(), Some(250));
        assert_eq!(probe.last_acknowledged_sequence(), 1);
        assert!(!probe.has_outstanding_token());
        Ok(())
    }

    #[test]
    fn test_post_if_idle_holds_back_while_outstanding() -> WatchdogResult<()> {
        let host = Arc::new(HoldingHost::default());
        let time = Arc::new(ManualTime::new(0));
        let mut probe = probe_with(&host, &time)?;

        assert_eq!(probe.post_if_idle()?, Some(1));
        assert_eq!(probe.post_if_idle()?, None);
        assert_eq!(host.held.lock().len(), 1);

        host.ack_all();
        assert_eq!(probe.post_if_idle()?, Some(2));
        Ok(())
    }

    #[test]
    fn test_late_ack_does_not_move_time_backwards() -> WatchdogResult<()> {
        let host = Arc::new(HoldingHost::default());
        let time = Arc::new(ManualTime::new(1_000));
        let mut probe = probe_with(&host, &time)?;

        probe.post_token()?;
        probe.post_token()?;
        let mut tokens: Vec<_> = host.held.lock().drain(..).collect();
        let newest = tokens.pop().ok_or_else(|| WatchdogError::probe_unavailable("missing"))?;
        newest.acknowledge();

        time.set_ms(900);
        for token in tokens {
            token.acknowledge();
        }

        assert_eq!(probe.last_ack_timestamp(), Some(1_000));
        assert_eq!(probe.last_acknowledged_sequence(), 2);
        Ok(())
    }

    #[test]
    fn test_unreachable_queue_reports_probe_unavailable() -> WatchdogResult<()> {
        let host = Arc::new(HoldingHost::default());
        let time = Arc::new(ManualTime::new(0));
        let mut probe = probe_with(&host, &time)?;

        host.unreachable.store(true, Ordering::Release);
        let result = probe.post_token();
        assert!(matches!(result, Err(WatchdogError::ProbeUnavailable(_))));
        assert!(!probe.has_outstanding_token());
        Ok(())
    }
}
