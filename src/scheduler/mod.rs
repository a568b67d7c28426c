//! Work scheduler: bounded-concurrency dispatch with file-based drain.

pub mod drain;
pub mod requests;
pub mod runner;
pub mod worker;

use std::fmt;

use serde::Serialize;

pub use drain::{DrainControl, DrainError};
pub use requests::{ControlRequest, RequestError, RequestQueue, RunMarker};
pub use runner::{ShutdownHandle, WorkScheduler};
pub use worker::{CommandWorker, WorkOutcome, WorkRequest, WorkerAgent, WorkerError};

use crate::feature::FeatureId;
use crate::state::{ProjectState, StateCounts};

/// Why a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every feature passes.
    #[default]
    Completed,
    /// Nothing is eligible or in flight, but some features are unfinished
    /// (blocked, or waiting on a dependency that is).
    Stalled,
    /// Shutdown was requested; in-flight work was allowed to finish.
    Shutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::Completed => "completed",
            ExitReason::Stalled => "stalled",
            ExitReason::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// Outcome counts for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Blockers raised during the run.
    pub blocked: usize,
    pub checkpoints: usize,
    pub exit_reason: ExitReason,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub drain_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_reason: Option<String>,
    pub max_concurrency: usize,
    pub in_flight: Vec<FeatureId>,
    pub counts: StateCounts,
    /// Head of the eligible list, in dispatch order.
    pub next_eligible: Vec<FeatureId>,
}

impl SchedulerStatus {
    /// Number of eligible features listed.
    pub const NEXT_LIMIT: usize = 5;

    pub fn collect(
        state: &ProjectState,
        drain: &DrainControl,
        max_concurrency: usize,
        min_confidence: f64,
    ) -> Result<Self, DrainError> {
        Ok(Self {
            drain_requested: drain.is_drain_requested()?,
            drain_reason: drain.reason()?,
            max_concurrency,
            in_flight: state.in_flight(),
            counts: state.counts(),
            next_eligible: state
                .eligible(min_confidence)
                .iter()
                .take(Self::NEXT_LIMIT)
                .map(|f| f.id)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use tempfile::TempDir;

    #[test]
    fn test_status_reflects_drain_and_queue() {
        let temp_dir = TempDir::new().expect("temp dir");
        let drain = DrainControl::new(temp_dir.path().join("pause_drain"));
        let mut state = ProjectState::with_features(vec![
            Feature::new(1, "A", 2.0),
            Feature::new(2, "B", 1.0),
            Feature::new(3, "C", 3.0).passing(),
        ]);
        state.try_claim(FeatureId(1), 0.6);

        let status = SchedulerStatus::collect(&state, &drain, 3, 0.6).expect("status");
        assert!(!status.drain_requested);
        assert_eq!(status.in_flight, vec![FeatureId(1)]);
        assert_eq!(status.next_eligible, vec![FeatureId(2)]);
        assert_eq!(status.counts.passing, 1);

        drain.request_pause("manual").expect("pause");
        let status = SchedulerStatus::collect(&state, &drain, 3, 0.6).expect("status");
        assert!(status.drain_requested);
        assert!(status.drain_reason.expect("reason").ends_with("manual"));
    }
}
