//! Autonomous feature-queue driver.
//!
//! Features are dispatched to an external coding agent under bounded
//! concurrency. Dependencies between features are detected from their
//! text, skipped features are classified and either retried, parked behind
//! a blocker for a human, or cascaded to their dependents, and periodic
//! checkpoints run quality checks that can queue fixes or pause the run.
//!
//! The [`scheduler::WorkScheduler`] ties the components together; each
//! component is also usable on its own against a [`state::ProjectState`].

pub mod blocker;
pub mod checkpoint;
pub mod config;
pub mod dependency;
pub mod error;
pub mod feature;
pub mod logging;
pub mod scheduler;
pub mod state;

pub use blocker::{
    classify, BlockerClassification, BlockerType, HumanInterventionCoordinator,
    InterventionChoice, InterventionOutcome,
};
pub use checkpoint::{CheckpointDecision, CheckpointOrchestrator, CheckpointRun, TriggerReason};
pub use config::AutopilotConfig;
pub use dependency::{DependencyDetector, DependencyGraph, SkipImpactAnalyzer, SkipRecommendation};
pub use error::{AutopilotError, Result};
pub use feature::{Feature, FeatureId, FeatureSpec};
pub use scheduler::{CommandWorker, DrainControl, RunSummary, WorkScheduler, WorkerAgent};
pub use state::{ProjectState, StateStore};
