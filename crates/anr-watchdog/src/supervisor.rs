//! Watchdog supervisor.
//!
//! Owns the lifecycle (bind, start, stop), the subscriber registry, and the
//! clock thread that runs probe → clock → classifier → subscribers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel;

use crate::classifier::{IncidentClassifier, IncidentState, Thresholds};
use crate::clock::{ClockThread, WatchdogClock};
use crate::config::WatchdogConfig;
use crate::error::{WatchdogError, WatchdogResult};
use crate::events::{
    AnrEvent, BlockedEvent, EventBus, EventKind, InfoEvent, SubscriberResult, SubscriptionId,
    WatchdogEvent,
};
use crate::host::{HostBinding, MonitoredContext};
use crate::probe::HeartbeatProbe;
use crate::stats::{WatchdogStats, WatchdogStatsSnapshot};
use crate::time::{MonotonicTime, TimeSource};

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WatchdogState {
    /// Not monitoring.
    #[default]
    Stopped,
    /// Clock thread running.
    Running,
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogState::Stopped => write!(f, "Stopped"),
            WatchdogState::Running => write!(f, "Running"),
        }
    }
}

struct Lifecycle {
    state: WatchdogState,
    context: Option<MonitoredContext>,
    run: Option<ActiveRun>,
}

struct ActiveRun {
    running: Arc<AtomicBool>,
    incident_state: Arc<AtomicU8>,
    clock: ClockThread,
}

/// State shared between the supervisor and its clock thread.
struct Shared {
    bus: EventBus,
    stats: WatchdogStats,
    last_report: Mutex<Option<AnrEvent>>,
}

impl Shared {
    fn emit(&self, event: &WatchdogEvent) {
        if let WatchdogEvent::Anr(anr) = event {
            *self.last_report.lock() = Some(anr.clone());
        }
        let delivery = self.bus.publish(event);
        self.stats.record_event(event.kind(), delivery.failures.len());
    }

    fn emit_info(&self, message: impl Into<String>) {
        self.emit(&WatchdogEvent::info(message));
    }
}

/// Per-run work executed on the clock thread.
struct ClockRunner {
    probe: HeartbeatProbe,
    clock: WatchdogClock,
    classifier: IncidentClassifier,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    incident_state: Arc<AtomicU8>,
    probe_unavailable: bool,
}

impl ClockRunner {
    fn tick(&mut self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        self.shared.stats.inc_tick();
        self.post_heartbeat();

        let sample = self.clock.sample(&self.probe);
        tracing::debug!(
            elapsed_ms = u64::try_from(sample.elapsed.as_millis()).unwrap_or(u64::MAX),
            stalled_ticks = sample.consecutive_stalled,
            "Watchdog tick"
        );

        let recoveries = self.classifier.recoveries();
        let events = self.classifier.classify(&sample, &self.probe);
        if self.classifier.recoveries() != recoveries {
            self.shared.stats.inc_recovery();
        }
        self.incident_state
            .store(self.classifier.state().to_raw(), Ordering::Release);

        for event in &events {
            // stop() may land between two deliveries.
            if !self.running.load(Ordering::Acquire) {
                return false;
            }
            self.shared.emit(event);
        }
        true
    }

    fn post_heartbeat(&mut self) {
        match self.probe.post_if_idle() {
            Ok(posted) => {
                if posted.is_some() {
                    self.shared.stats.inc_token_posted();
                }
                if self.probe_unavailable {
                    self.probe_unavailable = false;
                    tracing::info!("Monitored context reachable again");
                }
            }
            Err(error) => {
                self.shared.stats.inc_probe_failure();
                // One notice per outage, not one per tick.
                if !self.probe_unavailable {
                    self.probe_unavailable = true;
                    tracing::warn!(%error, "Heartbeat could not be posted");
                    if self.running.load(Ordering::Acquire) {
                        self.shared.emit_info(format!("Heartbeat probe unavailable: {error}"));
                    }
                }
            }
        }
    }
}

/// ANR watchdog supervisor.
///
/// Construct once per monitored context, subscribe, then [`start`](Self::start).
/// All events are delivered on the clock thread; subscribers that must run
/// on the monitored context have to marshal back themselves.
///
/// # Example
///
/// ```rust
/// use anr_watchdog::prelude::*;
/// use std::sync::Arc;
///
/// let queue = QueueContext::new("main");
/// let supervisor = WatchdogSupervisor::new(WatchdogConfig::default(), Arc::new(queue.clone()))?;
///
/// supervisor.subscribe_anr(|event| {
///     eprintln!("ANR after {}s: {}", event.blocked_duration_seconds, event.report);
///     Ok(())
/// });
///
/// assert_eq!(supervisor.start(), WatchdogState::Running);
/// queue.run_pending();
/// supervisor.stop();
/// assert_eq!(supervisor.state(), WatchdogState::Stopped);
/// # Ok::<(), anr_watchdog::WatchdogError>(())
/// ```
pub struct WatchdogSupervisor {
    config: WatchdogConfig,
    host: Arc<dyn HostBinding>,
    time: Arc<dyn TimeSource>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl WatchdogSupervisor {
    /// Create a stopped supervisor using the monotonic system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WatchdogConfig, host: Arc<dyn HostBinding>) -> WatchdogResult<Self> {
        Self::with_time_source(config, host, Arc::new(MonotonicTime::new()))
    }

    /// Create a stopped supervisor with an explicit time source.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_time_source(
        config: WatchdogConfig,
        host: Arc<dyn HostBinding>,
        time: Arc<dyn TimeSource>,
    ) -> WatchdogResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            host,
            time,
            shared: Arc::new(Shared {
                bus: EventBus::new(),
                stats: WatchdogStats::new(),
                last_report: Mutex::new(None),
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: WatchdogState::Stopped,
                context: None,
                run: None,
            }),
        })
    }

    /// Start monitoring. No-op if already running.
    ///
    /// The monitored context is bound on the first successful start and
    /// reused afterwards. A bind or spawn failure is reported as an info event
    /// and leaves the supervisor stopped, so calling `start` again is a safe
    /// retry.
    ///
    /// Returns the resulting state.
    pub fn start(&self) -> WatchdogState {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == WatchdogState::Running {
            tracing::debug!("Watchdog already running");
            return WatchdogState::Running;
        }

        let context = if let Some(context) = lifecycle.context.clone() {
            context
        } else {
            match MonitoredContext::bind(Arc::clone(&self.host)) {
                Ok(context) => {
                    lifecycle.context = Some(context.clone());
                    context
                }
                Err(error) => {
                    drop(lifecycle);
                    tracing::warn!(%error, "Failed to bind monitored context");
                    self.shared.emit_info(format!("Watchdog not started: {error}"));
                    return WatchdogState::Stopped;
                }
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let incident_state = Arc::new(AtomicU8::new(IncidentState::Healthy.to_raw()));
        let mut runner = ClockRunner {
            probe: HeartbeatProbe::new(context.clone(), Arc::clone(&self.time)),
            clock: WatchdogClock::new(self.config.poll_period, Arc::clone(&self.time)),
            classifier: IncidentClassifier::new(Thresholds::from(&self.config)),
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&running),
            incident_state: Arc::clone(&incident_state),
            probe_unavailable: false,
        };
        let period = runner.clock.period();

        match ClockThread::spawn(&self.config.thread_name, period, move || runner.tick()) {
            Ok(clock) => {
                lifecycle.run = Some(ActiveRun {
                    running,
                    incident_state,
                    clock,
                });
                lifecycle.state = WatchdogState::Running;
                tracing::info!(
                    context = %context.handle(),
                    soft_threshold_seconds = self.config.soft_threshold_seconds,
                    hard_threshold_seconds = self.config.hard_threshold_seconds,
                    "ANR watchdog started"
                );
                WatchdogState::Running
            }
            Err(error) => {
                drop(lifecycle);
                tracing::error!(%error, "Failed to start ANR watchdog");
                self.shared.emit_info(format!("Watchdog not started: {error}"));
                WatchdogState::Stopped
            }
        }
    }

    /// Stop monitoring. No-op if already stopped.
    ///
    /// Returns once the clock thread has exited; no event is delivered after
    /// this returns. When called from a subscriber (on the clock thread) the
    /// current tick delivers nothing further and the thread exits right after.
    pub fn stop(&self) {
        let run = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == WatchdogState::Stopped {
                return;
            }
            lifecycle.state = WatchdogState::Stopped;
            lifecycle.run.take()
        };

        if let Some(run) = run {
            run.running.store(false, Ordering::Release);
            // Joined outside the lifecycle lock so a subscriber may call back in.
            run.clock.halt();
        }
        tracing::info!("ANR watchdog stopped");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WatchdogState {
        self.lifecycle.lock().state
    }

    /// Whether the clock thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == WatchdogState::Running
    }

    /// Severity of the current incident, `Healthy` while stopped.
    ///
    /// Each run classifies into its own cell, so a run that is still winding
    /// down never overwrites the state of the run that replaced it.
    #[must_use]
    pub fn incident_state(&self) -> IncidentState {
        let lifecycle = self.lifecycle.lock();
        lifecycle.run.as_ref().map_or(IncidentState::Healthy, |run| {
            IncidentState::from_raw(run.incident_state.load(Ordering::Acquire)).unwrap_or_default()
        })
    }

    /// Block the monitored context for `duration` to exercise the pipeline.
    ///
    /// A helper thread takes a lock and holds it; a task posted to the
    /// monitored context then waits on that lock. Diagnostic use only.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::TestModeDisabled`] unless `test_mode_enabled`
    /// is set, [`WatchdogError::ProbeUnavailable`] if no context has been
    /// bound yet, or the host's error if it cannot accept tasks.
    pub fn trigger_test_incident(&self, duration: Duration) -> WatchdogResult<()> {
        if !self.config.test_mode_enabled {
            return Err(WatchdogError::TestModeDisabled);
        }
        let context = self
            .lifecycle
            .lock()
            .context
            .clone()
            .ok_or_else(|| WatchdogError::probe_unavailable("no monitored context bound"))?;

        tracing::warn!(
            context = %context.handle(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Triggering synthetic ANR"
        );

        let gate = Arc::new(Mutex::new(()));
        let holder_gate = Arc::clone(&gate);
        let (held_tx, held_rx) = channel::bounded::<()>(0);
        thread::Builder::new()
            .name("anr-test-incident".to_string())
            .spawn(move || {
                let _held = holder_gate.lock();
                if held_tx.send(()).is_ok() {
                    thread::sleep(duration);
                }
            })
            .map_err(|e| WatchdogError::unsupported(format!("test incident thread: {e}")))?;
        held_rx
            .recv()
            .map_err(|e| WatchdogError::unsupported(format!("test incident thread: {e}")))?;

        context.post_task(Box::new(move || {
            tracing::debug!("Synthetic ANR task waiting on held lock");
            let _contended = gate.lock();
        }))
    }

    /// Take the most recent ANR event, clearing it.
    pub fn take_last_report(&self) -> Option<AnrEvent> {
        self.shared.last_report.lock().take()
    }

    /// Subscribe to [`BlockedEvent`]s.
    pub fn subscribe_blocked<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&BlockedEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_blocked(subscriber)
    }

    /// Subscribe to [`AnrEvent`]s.
    pub fn subscribe_anr<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&AnrEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_anr(subscriber)
    }

    /// Subscribe to [`InfoEvent`]s.
    pub fn subscribe_info<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&InfoEvent) -> SubscriberResult + Send + Sync + 'static,
    {
        self.shared.bus.subscribe_info(subscriber)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(subscription)
    }

    /// Number of subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.shared.bus.subscriber_count(kind)
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> WatchdogStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }
}

impl Drop for WatchdogSupervisor {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("Watchdog dropped while still running - forcing stop");
            self.stop();
        }
    }
}

impl fmt::Debug for WatchdogSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogSupervisor")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("incident_state", &self.incident_state())
            .field("bus", &self.shared.bus)
            .finish_non_exhaustive()
    }
}
