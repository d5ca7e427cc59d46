//! Incident classification.
//!
//! A three-state machine over [`ClockSample`]s:
//!
//! ```text
//!            elapsed >= soft                elapsed >= hard
//! Healthy ──────────────────► SoftBlocked ─────────────────► HardBlocked
//!    ▲      (BlockedEvent)        │  ▲        (AnrEvent)            │
//!    │                            └──┘ every repeat interval         │
//!    │                              (BlockedEvent)                   │
//!    └──────────── probe acknowledges again (no event) ◄─────────────┘
//! ```
//!
//! The machine never leaves a blocked state until the probe acknowledges
//! again, which is what makes ANR reporting once-per-incident.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::ClockSample;
use crate::config::WatchdogConfig;
use crate::events::{AnrEvent, BlockedEvent, WatchdogEvent};
use crate::probe::HeartbeatProbe;
use crate::report::capture_failure_report;

/// Severity of the current incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum IncidentState {
    /// Context is acknowledging within the soft threshold.
    #[default]
    Healthy = 0,
    /// Unresponsive past the soft threshold.
    SoftBlocked = 1,
    /// Unresponsive past the hard threshold; ANR reported.
    HardBlocked = 2,
}

impl IncidentState {
    /// Convert from a raw value, as stored in an atomic.
    #[must_use]
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Healthy),
            1 => Some(Self::SoftBlocked),
            2 => Some(Self::HardBlocked),
            _ => None,
        }
    }

    /// Convert to a raw value.
    #[must_use]
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Whether an incident is in progress.
    #[must_use]
    pub fn is_blocked(self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentState::Healthy => write!(f, "Healthy"),
            IncidentState::SoftBlocked => write!(f, "SoftBlocked"),
            IncidentState::HardBlocked => write!(f, "HardBlocked"),
        }
    }
}

/// Threshold set, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// First blocked notification.
    pub soft_seconds: u64,
    /// ANR confirmation.
    pub hard_seconds: u64,
    /// Spacing of repeated blocked notifications; 0 disables repeats.
    pub repeat_interval_seconds: u64,
}

impl From<&WatchdogConfig> for Thresholds {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            soft_seconds: config.soft_threshold_seconds,
            hard_seconds: config.hard_threshold_seconds,
            repeat_interval_seconds: config.repeat_interval_seconds,
        }
    }
}

/// A state transition worth acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Emit a blocked notification.
    Blocked {
        /// Elapsed whole seconds.
        blocked_seconds: u64,
    },
    /// Emit the incident's single ANR.
    Anr {
        /// Elapsed whole seconds.
        blocked_seconds: u64,
    },
    /// The incident ended.
    Recovered {
        /// State the machine left.
        from: IncidentState,
        /// Longest elapsed time seen during the incident.
        peak_seconds: u64,
    },
}

/// Severity state machine plus event construction.
#[derive(Debug, Clone)]
pub struct IncidentClassifier {
    thresholds: Thresholds,
    state: IncidentState,
    last_reported_seconds: u64,
    peak_seconds: u64,
    incidents: u64,
    recoveries: u64,
}

impl IncidentClassifier {
    /// Create a classifier in the `Healthy` state.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: IncidentState::Healthy,
            last_reported_seconds: 0,
            peak_seconds: 0,
            incidents: 0,
            recoveries: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> IncidentState {
        self.state
    }

    /// Number of incidents (soft crossings) seen so far.
    #[must_use]
    pub fn incidents(&self) -> u64 {
        self.incidents
    }

    /// Number of incidents that ended with the context responding again.
    #[must_use]
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// Advance the state machine. Pure: no collaborator is consulted.
    pub fn observe(&mut self, sample: &ClockSample) -> Vec<Verdict> {
        let seconds = sample.elapsed_seconds();
        let mut verdicts = Vec::new();

        if self.state.is_blocked() && (sample.advanced || seconds < self.thresholds.soft_seconds) {
            verdicts.push(Verdict::Recovered {
                from: self.state,
                peak_seconds: self.peak_seconds,
            });
            self.state = IncidentState::Healthy;
            self.recoveries = self.recoveries.saturating_add(1);
            self.last_reported_seconds = 0;
            self.peak_seconds = 0;
        }

        if self.state == IncidentState::Healthy && seconds >= self.thresholds.soft_seconds {
            self.state = IncidentState::SoftBlocked;
            self.incidents = self.incidents.saturating_add(1);
            self.last_reported_seconds = seconds;
            verdicts.push(Verdict::Blocked {
                blocked_seconds: seconds,
            });
        } else if self.state == IncidentState::SoftBlocked
            && seconds < self.thresholds.hard_seconds
            && self.repeat_due(seconds)
        {
            self.last_reported_seconds = seconds;
            verdicts.push(Verdict::Blocked {
                blocked_seconds: seconds,
            });
        }

        if self.state == IncidentState::SoftBlocked && seconds >= self.thresholds.hard_seconds {
            self.state = IncidentState::HardBlocked;
            verdicts.push(Verdict::Anr {
                blocked_seconds: seconds,
            });
        }

        if self.state.is_blocked() {
            self.peak_seconds = self.peak_seconds.max(seconds);
        }
        verdicts
    }

    fn repeat_due(&self, seconds: u64) -> bool {
        let interval = self.thresholds.repeat_interval_seconds;
        interval > 0 && seconds >= self.last_reported_seconds.saturating_add(interval)
    }

    /// Advance the state machine and build the resulting events.
    ///
    /// Foreground state is read from the host now, not when the stalled token
    /// was posted. The diagnostic report is captured once, on the ANR
    /// transition; a capture failure yields a placeholder report. If the
    /// probe acknowledges while the report is being captured the stall was a
    /// false positive and an info event is returned instead of the ANR.
    pub fn classify(&mut self, sample: &ClockSample, probe: &HeartbeatProbe) -> Vec<WatchdogEvent> {
        let context = probe.context();
        let mut events = Vec::new();

        for verdict in self.observe(sample) {
            match verdict {
                Verdict::Blocked { blocked_seconds } => {
                    let is_foreground = context.is_foreground();
                    tracing::warn!(
                        context = %context.handle(),
                        blocked_seconds,
                        is_foreground,
                        "Monitored context is blocked"
                    );
                    events.push(WatchdogEvent::Blocked(BlockedEvent {
                        blocked_duration_seconds: blocked_seconds,
                        is_foreground,
                    }));
                }
                Verdict::Anr { blocked_seconds } => {
                    let report = match context.capture_report() {
                        Ok(report) => report,
                        Err(error) => {
                            tracing::warn!(context = %context.handle(), %error, "Diagnostic capture failed");
                            capture_failure_report(&error)
                        }
                    };

                    if probe.last_acknowledged_sequence() != sample.last_ack_sequence {
                        tracing::info!(
                            context = %context.handle(),
                            blocked_seconds,
                            "Context responded during diagnostic capture; ANR withheld"
                        );
                        events.push(WatchdogEvent::info(format!(
                            "False-positive ANR after {blocked_seconds}s: context responded during capture"
                        )));
                        continue;
                    }

                    let is_foreground = context.is_foreground();
                    tracing::error!(
                        context = %context.handle(),
                        blocked_seconds,
                        is_foreground,
                        "ANR detected"
                    );
                    events.push(WatchdogEvent::Anr(AnrEvent {
                        report,
                        blocked_duration_seconds: blocked_seconds,
                        is_foreground,
                    }));
                }
                Verdict::Recovered { from, peak_seconds } => {
                    tracing::info!(
                        context = %context.handle(),
                        %from,
                        peak_seconds,
                        "Monitored context recovered"
                    );
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::WatchdogClock;
    use crate::error::{WatchdogError, WatchdogResult};
    use crate::events::EventKind;
    use crate::host::{ContextHandle, HostBinding, MonitoredContext};
    use crate::probe::HeartbeatToken;
    use crate::time::ManualTime;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn thresholds() -> Thresholds {
        Thresholds {
            soft_seconds: 2,
            hard_seconds: 5,
            repeat_interval_seconds: 1,
        }
    }

    fn stalled(seconds: u64) -> ClockSample {
        ClockSample {
            now_ms: seconds * 1_000,
            last_ack_ms: Some(0),
            last_ack_sequence: 1,
            elapsed: Duration::from_secs(seconds),
            consecutive_stalled: u32::try_from(seconds).unwrap_or(u32::MAX),
            advanced: false,
            recovered: false,
        }
    }

    fn resumed(now_seconds: u64) -> ClockSample {
        ClockSample {
            now_ms: now_seconds * 1_000,
            last_ack_ms: Some(now_seconds * 1_000),
            last_ack_sequence: 2,
            elapsed: Duration::ZERO,
            consecutive_stalled: 0,
            advanced: true,
            recovered: true,
        }
    }

    #[test]
    fn test_initial_state_healthy() {
        let classifier = IncidentClassifier::new(thresholds());
        assert_eq!(classifier.state(), IncidentState::Healthy);
        assert_eq!(classifier.incidents(), 0);
    }

    #[test]
    fn test_soft_then_hard_progression() {
        let mut classifier = IncidentClassifier::new(thresholds());

        assert!(classifier.observe(&stalled(1)).is_empty());
        assert_eq!(
            classifier.observe(&stalled(2)),
            vec![Verdict::Blocked { blocked_seconds: 2 }]
        );
        assert_eq!(classifier.state(), IncidentState::SoftBlocked);

        assert_eq!(
            classifier.observe(&stalled(3)),
            vec![Verdict::Blocked { blocked_seconds: 3 }]
        );
        assert_eq!(
            classifier.observe(&stalled(4)),
            vec![Verdict::Blocked { blocked_seconds: 4 }]
        );
        assert_eq!(
            classifier.observe(&stalled(5)),
            vec![Verdict::Anr { blocked_seconds: 5 }]
        );
        assert_eq!(classifier.state(), IncidentState::HardBlocked);

        for second in 6..60 {
            assert!(classifier.observe(&stalled(second)).is_empty());
        }
    }

    #[test]
    fn test_repeat_interval_spacing() {
        let mut classifier = IncidentClassifier::new(Thresholds {
            soft_seconds: 2,
            hard_seconds: 20,
            repeat_interval_seconds: 5,
        });

        let blocked: Vec<u64> = (0..20)
            .flat_map(|s| classifier.observe(&stalled(s)))
            .filter_map(|v| match v {
                Verdict::Blocked { blocked_seconds } => Some(blocked_seconds),
                _ => None,
            })
            .collect();
        assert_eq!(blocked, vec![2, 7, 12, 17]);
    }

    #[test]
    fn test_zero_repeat_interval_disables_repeats() {
        let mut classifier = IncidentClassifier::new(Thresholds {
            repeat_interval_seconds: 0,
            ..thresholds()
        });
        let verdicts: Vec<_> = (0..10).flat_map(|s| classifier.observe(&stalled(s))).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Blocked { blocked_seconds: 2 },
                Verdict::Anr { blocked_seconds: 5 }
            ]
        );
    }

    #[test]
    fn test_jump_straight_past_hard_threshold() {
        let mut classifier = IncidentClassifier::new(thresholds());
        assert_eq!(
            classifier.observe(&stalled(7)),
            vec![
                Verdict::Blocked { blocked_seconds: 7 },
                Verdict::Anr { blocked_seconds: 7 }
            ]
        );
    }

    #[test]
    fn test_recovery_resets_without_event() {
        let mut classifier = IncidentClassifier::new(thresholds());
        for second in 0..=6 {
            let _ = classifier.observe(&stalled(second));
        }
        assert_eq!(classifier.state(), IncidentState::HardBlocked);

        let verdicts = classifier.observe(&resumed(7));
        assert_eq!(
            verdicts,
            vec![Verdict::Recovered {
                from: IncidentState::HardBlocked,
                peak_seconds: 6
            }]
        );
        assert_eq!(classifier.state(), IncidentState::Healthy);
        assert_eq!(classifier.recoveries(), 1);

        // A fresh incident reports again.
        assert_eq!(
            classifier.observe(&stalled(2)),
            vec![Verdict::Blocked { blocked_seconds: 2 }]
        );
        assert_eq!(classifier.incidents(), 2);
    }

    #[derive(Debug, Default)]
    struct ScriptedHost {
        held: Mutex<Vec<HeartbeatToken>>,
        fail_capture: bool,
        ack_during_capture: bool,
    }

    impl HostBinding for ScriptedHost {
        fn bind_monitored_context(&self) -> WatchdogResult<ContextHandle> {
            Ok(ContextHandle::new(1, "main"))
        }

        fn post_token(&self, _context: &ContextHandle, token: HeartbeatToken) -> WatchdogResult<()> {
            self.held.lock().push(token);
            Ok(())
        }

        fn capture_diagnostic_report(&self, _context: &ContextHandle) -> WatchdogResult<String> {
            if self.ack_during_capture {
                for token in self.held.lock().drain(..) {
                    token.acknowledge();
                }
            }
            if self.fail_capture {
                return Err(WatchdogError::diagnostic_capture_failed("no stacks"));
            }
            Ok(String::from(r#"{"title":"ANR Report"}"#))
        }

        fn is_foreground(&self) -> bool {
            true
        }
    }

    fn stalled_probe(host: ScriptedHost) -> WatchdogResult<(HeartbeatProbe, ClockSample)> {
        let time = Arc::new(ManualTime::new(0));
        let context = MonitoredContext::bind(Arc::new(host))?;
        let mut probe = HeartbeatProbe::new(context, time.clone());
        probe.post_token()?;

        time.set_ms(5_000);
        let mut clock = WatchdogClock::new(Duration::from_secs(1), time);
        let sample = clock.sample(&probe);
        Ok((probe, sample))
    }

    #[test]
    fn test_classify_builds_events_with_report() -> WatchdogResult<()> {
        let (probe, sample) = stalled_probe(ScriptedHost::default())?;
        let mut classifier = IncidentClassifier::new(thresholds());

        let events = classifier.classify(&sample, &probe);
        assert_eq!(
            events,
            vec![
                WatchdogEvent::Blocked(BlockedEvent {
                    blocked_duration_seconds: 5,
                    is_foreground: true,
                }),
                WatchdogEvent::Anr(AnrEvent {
                    report: String::from(r#"{"title":"ANR Report"}"#),
                    blocked_duration_seconds: 5,
                    is_foreground: true,
                }),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_capture_failure_uses_placeholder() -> WatchdogResult<()> {
        let (probe, sample) = stalled_probe(ScriptedHost {
            fail_capture: true,
            ..ScriptedHost::default()
        })?;
        let mut classifier = IncidentClassifier::new(thresholds());

        let events = classifier.classify(&sample, &probe);
        let Some(WatchdogEvent::Anr(anr)) = events.last() else {
            return Err(WatchdogError::diagnostic_capture_failed("no ANR emitted"));
        };
        assert!(anr.report.contains("ANR Report"));
        assert!(anr.report.contains("no stacks"));
        assert_eq!(classifier.state(), IncidentState::HardBlocked);
        Ok(())
    }

    #[test]
    fn test_response_during_capture_withholds_anr() -> WatchdogResult<()> {
        let (probe, sample) = stalled_probe(ScriptedHost {
            ack_during_capture: true,
            ..ScriptedHost::default()
        })?;
        let mut classifier = IncidentClassifier::new(thresholds());

        let events = classifier.classify(&sample, &probe);
        assert_eq!(events.len(), 2);
        assert_eq!(events.first().map(WatchdogEvent::kind), Some(EventKind::Blocked));
        assert!(matches!(
            events.last(),
            Some(WatchdogEvent::Info(info)) if info.message.starts_with("False-positive ANR")
        ));
        Ok(())
    }

    #[test]
    fn test_state_raw_conversion() {
        for state in [
            IncidentState::Healthy,
            IncidentState::SoftBlocked,
            IncidentState::HardBlocked,
        ] {
            assert_eq!(IncidentState::from_raw(state.to_raw()), Some(state));
        }
        assert_eq!(IncidentState::from_raw(9), None);
    }
}
