//! Watchdog clock.
//!
//! [`WatchdogClock`] turns the probe's acknowledgement state into
//! [`ClockSample`]s. [`ClockThread`] is the independent periodic executor that
//! drives it; it only ever reads atomics written by the monitored context.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::error::{WatchdogError, WatchdogResult};
use crate::probe::HeartbeatProbe;
use crate::time::{TimeSource, duration_to_ms};

/// One observation of the monitored context's responsiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Time of the observation.
    pub now_ms: u64,
    /// Most recent acknowledgement, if any.
    pub last_ack_ms: Option<u64>,
    /// Highest acknowledged token sequence (0 if none).
    pub last_ack_sequence: u64,
    /// Time since the last acknowledgement (or since the probe started).
    pub elapsed: Duration,
    /// Consecutive ticks without a new acknowledgement.
    pub consecutive_stalled: u32,
    /// Whether a new acknowledgement arrived since the previous tick.
    pub advanced: bool,
    /// Whether this tick ended a run of stalled ticks.
    pub recovered: bool,
}

impl ClockSample {
    /// Elapsed unresponsive time in whole seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed.as_secs()
    }
}

/// Computes elapsed unresponsive time from probe state.
#[derive(Debug)]
pub struct WatchdogClock {
    period: Duration,
    time: Arc<dyn TimeSource>,
    previous_sequence: Option<u64>,
    consecutive_stalled: u32,
    ticks: u64,
}

impl WatchdogClock {
    /// Create a clock ticking every `period`.
    #[must_use]
    pub fn new(period: Duration, time: Arc<dyn TimeSource>) -> Self {
        Self {
            period,
            time,
            previous_sequence: None,
            consecutive_stalled: 0,
            ticks: 0,
        }
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of samples taken so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Sample the probe at the current time.
    pub fn sample(&mut self, probe: &HeartbeatProbe) -> ClockSample {
        let now_ms = self.time.now_ms();
        self.sample_at(
            now_ms,
            probe.last_ack_timestamp(),
            probe.last_acknowledged_sequence(),
            probe.started_at_ms(),
        )
    }

    /// Sample from explicit readings.
    ///
    /// `baseline_ms` stands in for the acknowledgement time until the first
    /// token is acknowledged. A reading earlier than the last acknowledgement
    /// (clock drift) yields zero elapsed time rather than underflowing.
    pub fn sample_at(
        &mut self,
        now_ms: u64,
        last_ack_ms: Option<u64>,
        last_ack_sequence: u64,
        baseline_ms: u64,
    ) -> ClockSample {
        self.ticks = self.ticks.saturating_add(1);

        let advanced = match self.previous_sequence {
            Some(previous) => last_ack_sequence != previous,
            None => last_ack_sequence > 0,
        };
        self.previous_sequence = Some(last_ack_sequence);

        let recovered = advanced && self.consecutive_stalled > 0;
        if advanced {
            if recovered {
                tracing::debug!(
                    stalled_ticks = self.consecutive_stalled,
                    "Monitored context acknowledging again"
                );
            }
            self.consecutive_stalled = 0;
        } else {
            self.consecutive_stalled = self.consecutive_stalled.saturating_add(1);
        }

        let reference = last_ack_ms.unwrap_or(baseline_ms);
        let elapsed = Duration::from_millis(now_ms.saturating_sub(reference));

        ClockSample {
            now_ms,
            last_ack_ms,
            last_ack_sequence,
            elapsed,
            consecutive_stalled: self.consecutive_stalled,
            advanced,
            recovered,
        }
    }
}

/// A named thread invoking a callback every period until halted.
///
/// The wait is a channel receive with timeout, so [`halt`](Self::halt)
/// interrupts a sleeping thread immediately.
pub struct ClockThread {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl ClockThread {
    /// Spawn the thread. `on_tick` returns `false` to end the loop.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::ClockSpawnFailed`] if the OS refuses the thread.
    pub fn spawn<F>(name: &str, period: Duration, mut on_tick: F) -> WatchdogResult<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!(period_ms = duration_to_ms(period), "Watchdog clock started");
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !on_tick() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Watchdog clock stopped");
            })
            .map_err(|e| WatchdogError::ClockSpawnFailed(e.to_string()))?;

        let thread_id = handle.thread().id();
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            thread_id,
        })
    }

    /// Whether the caller is running on this clock thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop the loop and wait for the thread to exit.
    ///
    /// Called from the clock thread itself (e.g. by a subscriber), the loop is
    /// signalled but not joined; it exits after the current tick returns.
    pub fn halt(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the receiver with `Disconnected`.
        drop(self.stop_tx.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Watchdog clock thread panicked");
        }
    }
}

impl Drop for ClockThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ClockThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockThread")
            .field("thread_id", &self.thread_id)
            .field("running", &self.handle.is_some())
            .finish()
    }
}
