//! Skip-reason classification.
//!
//! A skip reason is scored against an ordered keyword table, one rule per
//! [`BlockerType`]. The highest score wins; ties go to the earlier rule and
//! an all-zero score falls back to `UnclearRequirements`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::BlockerType;

/// Ordered rule list: earlier rules win ties.
const RULES: &[(BlockerType, &[&str])] = &[
    (
        BlockerType::EnvConfig,
        &[
            "env",
            "environment variable",
            "api key",
            "secret",
            "credential",
            "credentials",
            "config",
            "configuration",
            "token",
            "missing",
            "not set",
            "client_id",
            "password",
            "connection string",
        ],
    ),
    (
        BlockerType::ExternalService,
        &[
            "account",
            "stripe",
            "twilio",
            "sendgrid",
            "aws",
            "firebase",
            "paypal",
            "third-party",
            "third party",
            "external service",
            "external api",
            "subscription",
            "sign up",
            "webhook",
            "provider",
            "sandbox",
        ],
    ),
    (
        BlockerType::TechPrerequisite,
        &[
            "depends on",
            "prerequisite",
            "not implemented",
            "not yet implemented",
            "blocked by",
            "first",
            "before",
            "schema",
            "migration",
            "library",
            "infrastructure",
            "upgrade",
        ],
    ),
    (
        BlockerType::UnclearRequirements,
        &[
            "unclear",
            "ambiguous",
            "clarify",
            "clarification",
            "not sure",
            "unsure",
            "decide",
            "decision",
            "question",
            "undefined",
            "conflicting",
        ],
    ),
    (
        BlockerType::LegitimateDeferral,
        &[
            "defer",
            "deferred",
            "later",
            "out of scope",
            "nice to have",
            "low priority",
            "postpone",
            "future",
            "phase 2",
            "not needed",
        ],
    ),
];

/// Result of classifying a skip reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockerClassification {
    pub blocker_type: BlockerType,
    pub requires_human_intervention: bool,
    /// Missing configuration keys (only extracted for `EnvConfig`).
    pub required_values: Vec<String>,
    /// Keyword hits for the winning type.
    pub score: usize,
}

impl BlockerClassification {
    /// A classification decided by the caller rather than by keyword scoring.
    pub fn of(blocker_type: BlockerType) -> Self {
        Self {
            blocker_type,
            requires_human_intervention: blocker_type.requires_human_intervention(),
            required_values: Vec::new(),
            score: 0,
        }
    }
}

/// Keyword-table classifier with precompiled word-boundary patterns.
pub struct BlockerClassifier {
    rules: Vec<(BlockerType, Vec<Regex>)>,
    env_key: Regex,
    quoted: Regex,
}

impl Default for BlockerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockerClassifier {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .map(|(blocker_type, keywords)| {
                let patterns = keywords
                    .iter()
                    .filter_map(|keyword| {
                        Regex::new(&format!(r"\b{}\b", regex::escape(keyword))).ok()
                    })
                    .collect();
                (*blocker_type, patterns)
            })
            .collect();

        Self {
            rules,
            env_key: Regex::new(r"\b[A-Z][A-Z0-9]*(?:_[A-Z0-9]+)+\b").expect("valid env key regex"),
            quoted: Regex::new(r#""([^"\n]+)"|(?:^|[^\w])'([^'\n]+)'|`([^`\n]+)`"#)
                .expect("valid quoted value regex"),
        }
    }

    /// Shared classifier instance.
    pub fn shared() -> &'static BlockerClassifier {
        static CLASSIFIER: OnceLock<BlockerClassifier> = OnceLock::new();
        CLASSIFIER.get_or_init(BlockerClassifier::new)
    }

    /// Score every type against the lower-cased reason.
    pub fn scores(&self, reason: &str) -> Vec<(BlockerType, usize)> {
        let lowered = reason.to_lowercase();
        self.rules
            .iter()
            .map(|(blocker_type, patterns)| {
                let hits = patterns
                    .iter()
                    .map(|pattern| pattern.find_iter(&lowered).count())
                    .sum();
                (*blocker_type, hits)
            })
            .collect()
    }

    pub fn classify(&self, reason: &str) -> BlockerClassification {
        let mut best = (BlockerType::UnclearRequirements, 0usize);
        for (blocker_type, score) in self.scores(reason) {
            if score > best.1 {
                best = (blocker_type, score);
            }
        }

        let (blocker_type, score) = best;
        let required_values = if blocker_type == BlockerType::EnvConfig {
            self.extract_required_values(reason)
        } else {
            Vec::new()
        };

        BlockerClassification {
            blocker_type,
            requires_human_intervention: blocker_type.requires_human_intervention(),
            required_values,
            score,
        }
    }

    /// Uppercase-with-underscore tokens and quoted/backticked substrings, deduplicated
    /// in order of first appearance.
    pub fn extract_required_values(&self, reason: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();

        for m in self.env_key.find_iter(reason) {
            found.push((m.start(), m.as_str().to_string()));
        }
        for caps in self.quoted.captures_iter(reason) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
                let value = m.as_str().trim();
                if !value.is_empty() {
                    found.push((m.start(), value.to_string()));
                }
            }
        }

        found.sort_by_key(|(position, _)| *position);
        let mut values: Vec<String> = Vec::new();
        for (_, value) in found {
            if !values.contains(&value) {
                values.push(value);
            }
        }
        values
    }
}

/// Classify with the shared classifier.
pub fn classify(reason: &str) -> BlockerClassification {
    BlockerClassifier::shared().classify(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_oauth_keys_is_env_config() {
        let result = classify("Missing OAUTH_CLIENT_ID and OAUTH_CLIENT_SECRET");
        assert_eq!(result.blocker_type, BlockerType::EnvConfig);
        assert!(result.requires_human_intervention);
        assert!(result.required_values.contains(&"OAUTH_CLIENT_ID".to_string()));
        assert!(result.required_values.contains(&"OAUTH_CLIENT_SECRET".to_string()));
    }

    #[test]
    fn test_stripe_account_is_external_service() {
        let result = classify("need Stripe account and API key");
        assert_eq!(result.blocker_type, BlockerType::ExternalService);
        assert!(result.requires_human_intervention);
        assert!(result.required_values.is_empty());
    }

    #[test]
    fn test_no_keywords_defaults_to_unclear() {
        let result = classify("zzz qqq");
        assert_eq!(result.blocker_type, BlockerType::UnclearRequirements);
        assert_eq!(result.score, 0);
        assert!(result.requires_human_intervention);
    }

    #[test]
    fn test_tech_prerequisite_does_not_need_human() {
        let result = classify("Blocked by the database migration which is not implemented");
        assert_eq!(result.blocker_type, BlockerType::TechPrerequisite);
        assert!(!result.requires_human_intervention);
    }

    #[test]
    fn test_deferral_does_not_need_human() {
        let result = classify("Nice to have, postpone to phase 2");
        assert_eq!(result.blocker_type, BlockerType::LegitimateDeferral);
        assert!(!result.requires_human_intervention);
    }

    #[test]
    fn test_word_boundaries_avoid_substring_hits() {
        // "development" must not count as "env", "accountant" must not count as "account"
        let scores = BlockerClassifier::new().scores("development accountant");
        assert!(scores.iter().all(|(_, score)| *score == 0));
    }

    #[test]
    fn test_extract_values_quoted_and_dedup() {
        let classifier = BlockerClassifier::new();
        let values = classifier.extract_required_values(
            "Set `DATABASE_URL` and \"redis url\"; DATABASE_URL is still missing",
        );
        assert_eq!(values, vec!["DATABASE_URL".to_string(), "redis url".to_string()]);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let reason = "Missing SENDGRID_API_KEY environment variable";
        assert_eq!(classify(reason), classify(reason));
    }
}
