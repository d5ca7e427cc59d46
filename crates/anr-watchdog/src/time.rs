//! Monotonic time sources.
//!
//! All watchdog timestamps are milliseconds on a single monotonic timeline
//! so they fit in one atomic word. [`MonotonicTime`] is the production source;
//! [`ManualTime`] lets tests and embedders drive time externally.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic millisecond clock shared by the probe and the watchdog clock.
pub trait TimeSource: fmt::Debug + Send + Sync {
    /// Milliseconds elapsed on this source's timeline.
    fn now_ms(&self) -> u64;
}

/// Saturating conversion of a duration to whole milliseconds.
#[must_use]
pub fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Wall-independent time based on [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    /// Create a time source whose timeline starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> u64 {
        duration_to_ms(self.origin.elapsed())
    }
}

/// Externally driven time.
///
/// Nothing advances this source except explicit calls to [`advance`] or
/// [`set_ms`], which makes stall scenarios reproducible regardless of how
/// the clock thread is scheduled.
///
/// [`advance`]: ManualTime::advance
/// [`set_ms`]: ManualTime::set_ms
#[derive(Debug, Default)]
pub struct ManualTime {
    now_ms: AtomicU64,
}

impl ManualTime {
    /// Create a manual source starting at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let step = duration_to_ms(by);
        let mut current = self.now_ms.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(step);
            match self.now_ms.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Set the absolute time. Moving backwards is allowed and models drift.
    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::Release);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_advance() {
        let time = ManualTime::new(100);
        time.advance(Duration::from_secs(2));
        assert_eq!(time.now_ms(), 2_100);

        time.set_ms(50);
        assert_eq!(time.now_ms(), 50);
    }

    #[test]
    fn test_manual_time_saturates() {
        let time = ManualTime::new(u64::MAX - 1);
        time.advance(Duration::from_secs(10));
        assert_eq!(time.now_ms(), u64::MAX);
    }

    #[test]
    fn test_monotonic_time_never_goes_backwards() {
        let time = MonotonicTime::new();
        let first = time.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(time.now_ms() >= first);
    }
}
