//! Feature records: the units of work driven through the queue.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blocker::BlockerType;

/// Numeric feature identifier, referenced in text as `#id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for FeatureId {
    fn from(value: u64) -> Self {
        FeatureId(value)
    }
}

/// Marks a feature synthesized by the auto-fix generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixTag {
    /// Checkpoint sequence number that produced the fix.
    pub checkpoint: u32,
    /// File or module the grouped issues point at.
    pub location: String,
}

/// One unit of delegated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Ascending = sooner. Fractional values slot work between neighbours.
    pub priority: f64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub was_skipped: bool,
    #[serde(default)]
    pub skip_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Failed worker attempts since the feature last passed.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_type: Option<BlockerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_description: Option<String>,
    #[serde(default)]
    pub passing_with_mocks: bool,
    /// Dependencies this feature is implementing against placeholders.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mocked_dependencies: BTreeSet<FeatureId>,
    /// Root cause when this feature was skipped by a cascade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cascade_root: Option<FeatureId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<AutoFixTag>,
    pub created_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(id: impl Into<FeatureId>, name: impl Into<String>, priority: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: None,
            priority,
            passes: false,
            in_progress: false,
            was_skipped: false,
            skip_count: 0,
            skip_reason: None,
            attempts: 0,
            is_blocked: false,
            blocker_type: None,
            blocker_description: None,
            passing_with_mocks: false,
            mocked_dependencies: BTreeSet::new(),
            cascade_root: None,
            auto_fix: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn passing(mut self) -> Self {
        self.passes = true;
        self
    }

    /// Name and description joined, the text scanned for dependencies.
    pub fn text(&self) -> String {
        if self.description.is_empty() {
            self.name.clone()
        } else {
            format!("{}\n{}", self.name, self.description)
        }
    }

    /// Whether the feature's own flags allow dispatch (dependencies aside).
    pub fn is_dispatchable(&self) -> bool {
        !self.passes && !self.in_progress && !self.is_blocked
    }

    pub fn is_auto_fix(&self) -> bool {
        self.auto_fix.is_some()
    }
}

/// Intake record accepted by `autopilot import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub passes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_feature_is_dispatchable() {
        let feature = Feature::new(1, "Login form", 1.0);
        assert!(feature.is_dispatchable());
        assert!(!feature.is_auto_fix());
    }

    #[test]
    fn test_flags_block_dispatch() {
        let mut feature = Feature::new(1, "Login form", 1.0);
        feature.in_progress = true;
        assert!(!feature.is_dispatchable());

        let mut feature = Feature::new(2, "Signup", 2.0);
        feature.is_blocked = true;
        assert!(!feature.is_dispatchable());

        let feature = Feature::new(3, "Logout", 3.0).passing();
        assert!(!feature.is_dispatchable());
    }

    #[test]
    fn test_text_joins_name_and_description() {
        let feature = Feature::new(12, "Profile page", 4.0).with_description("after OAuth (#5)");
        assert_eq!(feature.text(), "Profile page\nafter OAuth (#5)");
    }

    #[test]
    fn test_feature_spec_parses_camel_case() {
        let spec: FeatureSpec =
            serde_json::from_str(r#"{"id": 3, "name": "Search", "priority": 2.5}"#)
                .expect("parse");
        assert_eq!(spec.id, 3);
        assert_eq!(spec.priority, Some(2.5));
        assert!(!spec.passes);
    }
}
