//! Crate-level error type.
//!
//! Component errors live next to the code that produces them
//! (`StateError`, `DrainError`, `CheckError`, `WorkerError`); this module
//! aggregates them for callers that cross component boundaries.

use thiserror::Error;

use crate::checkpoint::store::CheckpointStoreError;
use crate::feature::FeatureId;
use crate::scheduler::drain::DrainError;
use crate::scheduler::requests::RequestError;
use crate::state::store::StateError;

/// Errors surfaced by the autopilot control plane.
#[derive(Error, Debug)]
pub enum AutopilotError {
    /// The referenced feature does not exist.
    #[error("feature #{0} not found")]
    FeatureNotFound(FeatureId),

    /// The referenced blocker does not exist.
    #[error("blocker {0} not found")]
    BlockerNotFound(u64),

    /// The referenced assumption does not exist.
    #[error("assumption {0} not found")]
    AssumptionNotFound(u64),

    /// Project state could not be loaded or saved.
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// The drain control file could not be read or written.
    #[error("drain control error: {0}")]
    Drain(#[from] DrainError),

    /// A control request could not be queued or read.
    #[error("control request error: {0}")]
    Request(#[from] RequestError),

    /// Checkpoint run metadata could not be persisted.
    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] CheckpointStoreError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The effective configuration could not be rendered.
    #[error("configuration render error: {0}")]
    Render(#[from] toml::ser::Error),

    /// IO error outside of the dedicated stores (env file, blockers document).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error outside of the dedicated stores (feature import).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AutopilotError {
    /// Whether the error refers to a missing target (CLI exit code 1, no state mutated).
    pub fn is_invalid_target(&self) -> bool {
        matches!(
            self,
            AutopilotError::FeatureNotFound(_)
                | AutopilotError::BlockerNotFound(_)
                | AutopilotError::AssumptionNotFound(_)
        )
    }
}

/// Result type for crate-level operations.
pub type Result<T> = std::result::Result<T, AutopilotError>;
