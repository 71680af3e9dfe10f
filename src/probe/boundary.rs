//! Boundary discovery by binary search
//!
//! Finds the largest size a broker accepts, given a side-effecting trial that
//! is assumed monotonic (every size below an accepted size is accepted too).
//! The first trial is always the maximum candidate; only when that fails does
//! the search bisect `[0, max_candidate]`.

use super::outcome::{DiscoveryResult, SizedProbeResult};
use async_trait::async_trait;
use tracing::debug;

/// Outcome of one trial
pub trait TrialOutcome {
    fn is_success(&self) -> bool;
}

impl TrialOutcome for bool {
    fn is_success(&self) -> bool {
        *self
    }
}

/// A single-size trial against the broker
#[async_trait]
pub trait SizeTrial: Send {
    type Outcome: TrialOutcome + Send;

    async fn attempt(&mut self, size: usize) -> Self::Outcome;
}

/// Adapts a synchronous closure into a [`SizeTrial`]
pub struct SyncTrial<F>(pub F);

#[async_trait]
impl<F, O> SizeTrial for SyncTrial<F>
where
    F: FnMut(usize) -> O + Send,
    O: TrialOutcome + Send,
{
    type Outcome = O;

    async fn attempt(&mut self, size: usize) -> O {
        (self.0)(size)
    }
}

/// Binary search over `[0, max_candidate]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundarySearch {
    max_candidate: usize,
}

impl BoundarySearch {
    pub fn new(max_candidate: usize) -> Self {
        Self { max_candidate }
    }

    pub fn max_candidate(&self) -> usize {
        self.max_candidate
    }

    /// Run the search and return every trial in order
    pub async fn run<T: SizeTrial>(&self, trial: &mut T) -> DiscoveryResult<T::Outcome> {
        self.run_with(trial, |_| {}).await
    }

    /// Run the search and hand the resulting boundary to `on_boundary_found`
    ///
    /// The boundary is `max_candidate` when the first trial succeeds. Otherwise
    /// it is the midpoint of the last iteration, which can be one above the
    /// largest accepted size; see [`DiscoveryResult::largest_success`].
    pub async fn run_with<T, C>(
        &self,
        trial: &mut T,
        on_boundary_found: C,
    ) -> DiscoveryResult<T::Outcome>
    where
        T: SizeTrial,
        C: FnOnce(usize),
    {
        let mut trials = Vec::new();

        let outcome = trial.attempt(self.max_candidate).await;
        let accepted = outcome.is_success();
        debug!(size = self.max_candidate, accepted, "Boundary trial");
        trials.push(SizedProbeResult {
            size: self.max_candidate,
            outcome,
        });

        if accepted {
            on_boundary_found(self.max_candidate);
            return DiscoveryResult {
                boundary: self.max_candidate,
                trials,
            };
        }

        let mut bottom = 0usize;
        let mut top = self.max_candidate;
        let mut mid = 0usize;

        while bottom <= top {
            mid = bottom + (top - bottom) / 2;
            let outcome = trial.attempt(mid).await;
            let accepted = outcome.is_success();
            debug!(size = mid, accepted, "Boundary trial");
            trials.push(SizedProbeResult { size: mid, outcome });

            if accepted {
                match mid.checked_add(1) {
                    Some(next) => bottom = next,
                    None => break,
                }
            } else {
                match mid.checked_sub(1) {
                    Some(next) => top = next,
                    None => break,
                }
            }
        }

        on_boundary_found(mid);
        DiscoveryResult {
            boundary: mid,
            trials,
        }
    }
}
