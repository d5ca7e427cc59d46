//! Property-based tests for clock and classifier invariants.

use anr_watchdog::prelude::*;
use anr_watchdog::{IncidentClassifier, Thresholds, Verdict, WatchdogClock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn thresholds(soft: u64, hard: u64, repeat: u64) -> Thresholds {
    Thresholds {
        soft_seconds: soft,
        hard_seconds: hard,
        repeat_interval_seconds: repeat,
    }
}

fn clock() -> WatchdogClock {
    WatchdogClock::new(Duration::from_secs(1), Arc::new(ManualTime::new(0)))
}

fn count(verdicts: &[Verdict], anr: bool) -> usize {
    verdicts
        .iter()
        .filter(|v| match v {
            Verdict::Anr { .. } => anr,
            Verdict::Blocked { .. } => !anr,
            Verdict::Recovered { .. } => false,
        })
        .count()
}

proptest! {
    #[test]
    fn test_elapsed_is_now_minus_last_ack(
        ack in 0..1_000_000_000u64,
        delta in 0..1_000_000_000u64,
    ) {
        let mut clock = clock();
        let sample = clock.sample_at(ack + delta, Some(ack), 1, 0);
        prop_assert_eq!(sample.elapsed, Duration::from_millis(delta));
        prop_assert_eq!(sample.elapsed_seconds(), delta / 1_000);
    }

    #[test]
    fn test_elapsed_never_negative_under_drift(
        now in 0..1_000_000u64,
        ack in 0..1_000_000u64,
    ) {
        let mut clock = clock();
        let sample = clock.sample_at(now, Some(ack), 1, 0);
        prop_assert_eq!(sample.elapsed, Duration::from_millis(now.saturating_sub(ack)));
    }

    #[test]
    fn test_at_most_one_anr_per_stall(
        steps in prop::collection::vec(0..4_000u64, 1..200),
        soft in 1..10u64,
        gap in 1..10u64,
        repeat in 0..5u64,
    ) {
        let mut clock = clock();
        let mut classifier = IncidentClassifier::new(thresholds(soft, soft + gap, repeat));
        let mut verdicts = Vec::new();
        let mut now = 0;
        for step in steps {
            now += step;
            let sample = clock.sample_at(now, Some(0), 1, 0);
            verdicts.extend(classifier.observe(&sample));
        }

        let anrs = count(&verdicts, true);
        prop_assert!(anrs <= 1);
        prop_assert_eq!(anrs == 1, now / 1_000 >= soft + gap);
        prop_assert_eq!(count(&verdicts, false) >= 1, now / 1_000 >= soft);
    }

    #[test]
    fn test_blocked_count_per_second_stall(stall in 0..30u64) {
        let mut clock = clock();
        let mut classifier = IncidentClassifier::new(thresholds(2, 5, 1));
        let mut verdicts = Vec::new();
        for second in 0..=stall {
            let sample = clock.sample_at(second * 1_000, Some(0), 1, 0);
            verdicts.extend(classifier.observe(&sample));
        }

        // Blocked at 2, 3 and 4 seconds, then the ANR takes over.
        let expected_blocked = if stall >= 2 { stall.min(4) - 1 } else { 0 };
        prop_assert_eq!(count(&verdicts, false) as u64, expected_blocked);
        prop_assert_eq!(count(&verdicts, true), usize::from(stall >= 5));
    }

    #[test]
    fn test_acknowledgement_always_returns_to_healthy(
        stall in 0..60u64,
        soft in 1..10u64,
        gap in 1..10u64,
    ) {
        let mut clock = clock();
        let mut classifier = IncidentClassifier::new(thresholds(soft, soft + gap, 1));
        for second in 0..=stall {
            let sample = clock.sample_at(second * 1_000, Some(0), 1, 0);
            classifier.observe(&sample);
        }

        let resumed_at = (stall + 1) * 1_000;
        let sample = clock.sample_at(resumed_at, Some(resumed_at), 2, 0);
        let verdicts = classifier.observe(&sample);

        prop_assert_eq!(classifier.state(), IncidentState::Healthy);
        prop_assert_eq!(count(&verdicts, true), 0);
        prop_assert_eq!(count(&verdicts, false), 0);
        prop_assert_eq!(classifier.recoveries(), u64::from(stall >= soft));
    }

    #[test]
    fn test_config_threshold_ordering(soft in 1..100u64, hard in 1..200u64) {
        let result = WatchdogConfig::builder()
            .soft_threshold_seconds(soft)
            .hard_threshold_seconds(hard)
            .poll_period(Duration::from_millis(500))
            .build();
        prop_assert_eq!(result.is_ok(), hard > soft);
    }
}
