//! When to run a checkpoint.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::CheckpointConfig;

/// Why a checkpoint ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "keyword")]
pub enum TriggerReason {
    /// Every N completed features.
    Frequency,
    /// A milestone keyword matched the completed feature's name.
    Milestone(String),
    /// Requested from the command line.
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Frequency => f.write_str("frequency"),
            TriggerReason::Milestone(keyword) => write!(f, "milestone ({})", keyword),
            TriggerReason::Manual => f.write_str("manual"),
        }
    }
}

fn ends_in_sibilant(stem: &str) -> bool {
    ["ch", "sh", "ss", "x", "z"]
        .iter()
        .any(|suffix| stem.ends_with(suffix))
}

/// Reduce a word to the key used for milestone matching. Singular and
/// plural forms share a key: "payments" and "payment" give "payment",
/// "authorities" gives "authority", and "caches", "cache" both give "cach"
/// because a trailing "e" after ch/sh/ss/x/z is dropped too.
fn match_key(word: &str) -> String {
    let word = word.to_lowercase();
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() > 1 {
            return format!("{}y", stem);
        }
    }
    let stem = match word.strip_suffix("es").filter(|stem| ends_in_sibilant(stem)) {
        Some(stem) => stem,
        None if word.ends_with('s') && !word.ends_with("ss") && word.len() > 3 => {
            &word[..word.len() - 1]
        }
        None => word.as_str(),
    };
    stem.strip_suffix('e')
        .filter(|stem| ends_in_sibilant(stem))
        .unwrap_or(stem)
        .to_string()
}

pub struct CheckpointTrigger {
    frequency: u32,
    /// (original keyword, its word keys)
    milestones: Vec<(String, Vec<String>)>,
    word: Regex,
}

impl CheckpointTrigger {
    pub fn new(config: &CheckpointConfig) -> Self {
        let word = Regex::new(r"[A-Za-z0-9]+").expect("valid word regex");
        let milestones = config
            .milestone_keywords
            .iter()
            .map(|keyword| {
                let words: Vec<String> = word
                    .find_iter(keyword)
                    .map(|m| match_key(m.as_str()))
                    .collect();
                (keyword.clone(), words)
            })
            .filter(|(_, words)| !words.is_empty())
            .collect();
        Self {
            frequency: config.frequency,
            milestones,
            word,
        }
    }

    /// Milestone keyword matched by a feature name, if any. Multi-word
    /// keywords must appear as a contiguous run of words.
    pub fn milestone_in(&self, feature_name: &str) -> Option<&str> {
        let words: Vec<String> = self
            .word
            .find_iter(feature_name)
            .map(|m| match_key(m.as_str()))
            .collect();
        self.milestones
            .iter()
            .find(|(_, keyword)| {
                words
                    .windows(keyword.len())
                    .any(|window| window == keyword.as_slice())
            })
            .map(|(original, _)| original.as_str())
    }

    /// Evaluate after a feature completes. `completed_count` already
    /// includes the feature just completed.
    pub fn evaluate(&self, completed_count: u32, feature_name: &str) -> Option<TriggerReason> {
        if let Some(keyword) = self.milestone_in(feature_name) {
            return Some(TriggerReason::Milestone(keyword.to_string()));
        }
        if self.frequency > 0 && completed_count > 0 && completed_count % self.frequency == 0 {
            return Some(TriggerReason::Frequency);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(frequency: u32, keywords: &[&str]) -> CheckpointTrigger {
        let config = CheckpointConfig {
            frequency,
            milestone_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            ..CheckpointConfig::default()
        };
        CheckpointTrigger::new(&config)
    }

    #[test]
    fn test_match_keys() {
        assert_eq!(match_key("Payments"), "payment");
        assert_eq!(match_key("authorities"), "authority");
        assert_eq!(match_key("batches"), "batch");
        assert_eq!(match_key("boxes"), "box");
        assert_eq!(match_key("accesses"), "access");
        assert_eq!(match_key("access"), "access");
        assert_eq!(match_key("bus"), "bus");
        assert_eq!(match_key("Releases"), "release");
        for (singular, plural) in [("cache", "Caches"), ("size", "sizes"), ("batch", "batches")] {
            assert_eq!(match_key(singular), match_key(plural), "{}", singular);
        }
    }

    #[test]
    fn test_frequency_trigger() {
        let t = trigger(10, &[]);
        assert_eq!(t.evaluate(9, "Settings"), None);
        assert_eq!(t.evaluate(10, "Settings"), Some(TriggerReason::Frequency));
        assert_eq!(t.evaluate(20, "Settings"), Some(TriggerReason::Frequency));
    }

    #[test]
    fn test_frequency_zero_disables() {
        let t = trigger(0, &[]);
        assert_eq!(t.evaluate(10, "Settings"), None);
    }

    #[test]
    fn test_milestone_matches_plural_name() {
        let t = trigger(10, &["payment"]);
        assert_eq!(
            t.evaluate(3, "Recurring Payments"),
            Some(TriggerReason::Milestone("payment".to_string()))
        );
    }

    #[test]
    fn test_milestone_matches_plural_es_words() {
        let t = trigger(0, &["cache", "size", "release"]);
        assert_eq!(t.milestone_in("Response Caches"), Some("cache"));
        assert_eq!(t.milestone_in("Image Sizes"), Some("size"));
        assert_eq!(t.milestone_in("Releases page"), Some("release"));

        let t = trigger(0, &["inboxes"]);
        assert_eq!(t.milestone_in("Shared inbox"), Some("inboxes"));
    }

    #[test]
    fn test_milestone_matches_plural_keyword() {
        let t = trigger(10, &["user accounts"]);
        assert!(t.milestone_in("Delete user account").is_some());
        assert!(t.milestone_in("Account for users").is_none());
    }

    #[test]
    fn test_milestone_requires_whole_words() {
        let t = trigger(10, &["auth"]);
        assert!(t.milestone_in("Authentication flow").is_none());
        assert!(t.milestone_in("Auth flow").is_some());
    }
}
