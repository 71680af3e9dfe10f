//! Boundary search behavior
//!
//! Tests the binary search engine against synthetic monotonic trials: the
//! first-trial shortcut, the reported boundary and the trial log.

use mqtt_probe::probe::{BoundarySearch, DiscoveryResult, SizeTrial, SyncTrial};
use proptest::prelude::*;

fn run<T: SizeTrial>(max: usize, trial: &mut T) -> DiscoveryResult<T::Outcome> {
    tokio_test::block_on(BoundarySearch::new(max).run(trial))
}

proptest! {
    #[test]
    fn boundary_is_last_midpoint_next_to_limit(max in 1usize..200_000, limit_ratio in 0.0f64..1.0) {
        let limit = ((max as f64) * limit_ratio) as usize;
        let mut trial = SyncTrial(|size| size <= limit);

        let result = run(max, &mut trial);

        prop_assert!(result.boundary <= max);
        prop_assert!(result.boundary == limit || result.boundary == limit + 1);
        prop_assert_eq!(result.largest_success(), Some(limit));
    }

    #[test]
    fn accepted_maximum_needs_one_trial(max in 0usize..1_000_000) {
        let mut trial = SyncTrial(|_| true);

        let result = run(max, &mut trial);

        prop_assert_eq!(result.boundary, max);
        prop_assert_eq!(result.trials.len(), 1);
    }

    #[test]
    fn trial_log_is_logarithmic(max in 1usize..1_000_000, limit in 0usize..1_000_000) {
        let limit = limit % max;
        let mut trial = SyncTrial(|size| size <= limit);

        let result = run(max, &mut trial);

        // First trial plus at most one bisection step per bit
        let bits = usize::BITS - max.leading_zeros();
        prop_assert!(result.trials.len() <= 2 + bits as usize);
        prop_assert_eq!(result.trials[0].size, max);
    }
}

#[tokio::test]
async fn test_payload_boundary_scenario() {
    // Arrange: the broker refuses payloads over 512 bytes
    let mut trial = SyncTrial(|size| size <= 512);

    // Act
    let result = BoundarySearch::new(1024).run(&mut trial).await;

    // Assert
    assert!(!result.trials[0].outcome);
    assert_eq!(result.trials[0].size, 1024);
    assert_eq!(result.largest_success(), Some(512));
    assert_eq!(result.boundary, 513);
}

#[tokio::test]
async fn test_boundary_callback_runs_once_on_both_paths() {
    let mut calls = Vec::new();
    BoundarySearch::new(64)
        .run_with(&mut SyncTrial(|_| true), |b| calls.push(b))
        .await;
    BoundarySearch::new(64)
        .run_with(&mut SyncTrial(|size| size <= 10), |b| calls.push(b))
        .await;

    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], 64);
    assert!(calls[1] == 10 || calls[1] == 11);
}

#[tokio::test]
async fn test_nothing_accepted_reports_zero() {
    let result = BoundarySearch::new(1000)
        .run(&mut SyncTrial(|_| false))
        .await;

    assert_eq!(result.boundary, 0);
    assert_eq!(result.largest_success(), None);
}
