//! Blockers: skip classification, the human-intervention workflow, and
//! the standing blockers document.

pub mod classifier;
pub mod document;
pub mod env_file;
pub mod intervention;
pub mod record;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use classifier::{classify, BlockerClassification, BlockerClassifier};
pub use document::BlockersDocument;
pub use env_file::{EnvFile, EnvWriteReport};
pub use intervention::{
    HumanInterventionCoordinator, InterventionChoice, InterventionOutcome, InterventionPrompt,
    InterventionRequest, InterventionResponse, ScriptedPrompt, TerminalPrompt,
};
pub use record::{
    Assumption, AssumptionStatus, Blocker, BlockerStatus, ResolutionAction,
};

/// Category of obstruction behind a skipped feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerType {
    EnvConfig,
    ExternalService,
    TechPrerequisite,
    UnclearRequirements,
    LegitimateDeferral,
}

impl BlockerType {
    pub const ALL: [BlockerType; 5] = [
        BlockerType::EnvConfig,
        BlockerType::ExternalService,
        BlockerType::TechPrerequisite,
        BlockerType::UnclearRequirements,
        BlockerType::LegitimateDeferral,
    ];

    /// Only a human can supply configuration, service access, or a decision.
    pub fn requires_human_intervention(&self) -> bool {
        matches!(
            self,
            BlockerType::EnvConfig
                | BlockerType::ExternalService
                | BlockerType::UnclearRequirements
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            BlockerType::EnvConfig => "ENV_CONFIG",
            BlockerType::ExternalService => "EXTERNAL_SERVICE",
            BlockerType::TechPrerequisite => "TECH_PREREQUISITE",
            BlockerType::UnclearRequirements => "UNCLEAR_REQUIREMENTS",
            BlockerType::LegitimateDeferral => "LEGITIMATE_DEFERRAL",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            BlockerType::EnvConfig => "Environment configuration",
            BlockerType::ExternalService => "External services",
            BlockerType::TechPrerequisite => "Technical prerequisites",
            BlockerType::UnclearRequirements => "Unclear requirements",
            BlockerType::LegitimateDeferral => "Deferred work",
        }
    }
}

impl fmt::Display for BlockerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_intervention_set() {
        let human: Vec<BlockerType> = BlockerType::ALL
            .into_iter()
            .filter(|t| t.requires_human_intervention())
            .collect();
        assert_eq!(
            human,
            vec![
                BlockerType::EnvConfig,
                BlockerType::ExternalService,
                BlockerType::UnclearRequirements
            ]
        );
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&BlockerType::EnvConfig).expect("serialize");
        assert_eq!(json, "\"ENV_CONFIG\"");
        assert_eq!(BlockerType::ExternalService.to_string(), "EXTERNAL_SERVICE");
    }
}
