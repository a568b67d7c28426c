//! Blocker and assumption records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BlockerType;
use crate::feature::FeatureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerStatus {
    Active,
    Resolved,
}

/// How a blocker was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionAction {
    /// A human supplied the missing values.
    Provided,
    /// Recorded in the blockers document; the feature stays blocked.
    Deferred,
    /// The feature proceeds against a placeholder.
    Mocked,
    /// Cleared from the command line.
    ManualUnblock,
}

impl ResolutionAction {
    pub fn as_label(&self) -> &'static str {
        match self {
            ResolutionAction::Provided => "PROVIDED",
            ResolutionAction::Deferred => "DEFERRED",
            ResolutionAction::Mocked => "MOCKED",
            ResolutionAction::ManualUnblock => "MANUAL_UNBLOCK",
        }
    }
}

/// One obstruction on a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub id: u64,
    pub feature_id: FeatureId,
    pub blocker_type: BlockerType,
    pub description: String,
    #[serde(default)]
    pub required_values: Vec<String>,
    pub status: BlockerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_action: Option<ResolutionAction>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Blocker {
    pub fn new(
        id: u64,
        feature_id: FeatureId,
        blocker_type: BlockerType,
        description: impl Into<String>,
        required_values: Vec<String>,
    ) -> Self {
        Self {
            id,
            feature_id,
            blocker_type,
            description: description.into(),
            required_values,
            status: BlockerStatus::Active,
            resolution_action: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BlockerStatus::Active
    }

    pub fn resolve(&mut self, action: ResolutionAction) {
        self.status = BlockerStatus::Resolved;
        self.resolution_action = Some(action);
        self.resolved_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssumptionStatus {
    Active,
    /// The dependency it was made about has since passed.
    NeedsReview,
    Validated,
    Invalid,
}

impl AssumptionStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            AssumptionStatus::Active => "ACTIVE",
            AssumptionStatus::NeedsReview => "NEEDS_REVIEW",
            AssumptionStatus::Validated => "VALIDATED",
            AssumptionStatus::Invalid => "INVALID",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, AssumptionStatus::Active | AssumptionStatus::NeedsReview)
    }
}

/// A guess documented by one feature while it proceeds without something it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
    pub id: u64,
    /// Feature that made the assumption.
    pub feature_id: FeatureId,
    /// Skipped dependency the assumption is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<FeatureId>,
    pub description: String,
    pub status: AssumptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assumption {
    pub fn new(
        id: u64,
        feature_id: FeatureId,
        about: Option<FeatureId>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            feature_id,
            about,
            description: description.into(),
            status: AssumptionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: AssumptionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_resolve_records_action() {
        let mut blocker = Blocker::new(1, FeatureId(5), BlockerType::EnvConfig, "keys", vec![]);
        assert!(blocker.is_active());

        blocker.resolve(ResolutionAction::Provided);
        assert!(!blocker.is_active());
        assert_eq!(blocker.resolution_action, Some(ResolutionAction::Provided));
        assert!(blocker.resolved_at.is_some());
    }

    #[test]
    fn test_assumption_open_states() {
        assert!(AssumptionStatus::Active.is_open());
        assert!(AssumptionStatus::NeedsReview.is_open());
        assert!(!AssumptionStatus::Validated.is_open());
        assert!(!AssumptionStatus::Invalid.is_open());
    }
}
