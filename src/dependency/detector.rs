//! Dependency detection from feature text.
//!
//! Three strategies run independently over one feature's name and
//! description:
//!
//! - **Explicit reference**: `#12` or `feature 12` naming an existing id.
//! - **Keyword**: a dependency phrase ("requires", "after", ...) together with
//!   another feature's name or category.
//! - **Category**: a static table of category prerequisites
//!   (e.g. authorization needs authentication).
//!
//! Candidate edges are merged per target, keeping the highest confidence.

use std::collections::HashMap;

use regex::Regex;

use super::graph::{DependencyEdge, DetectionMethod};
use crate::config::DependencyPolicy;
use crate::feature::{Feature, FeatureId};

/// Detects candidate dependency edges using a [`DependencyPolicy`].
pub struct DependencyDetector {
    policy: DependencyPolicy,
    explicit_patterns: Vec<Regex>,
    keyword_patterns: Vec<Regex>,
}

impl DependencyDetector {
    pub fn new(policy: DependencyPolicy) -> Self {
        let explicit_patterns = [r"#(\d+)\b", r"(?i)\bfeature\s+(\d+)\b"]
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        let keyword_patterns = policy
            .keywords
            .iter()
            .filter_map(|keyword| word_pattern(keyword))
            .collect();

        Self {
            policy,
            explicit_patterns,
            keyword_patterns,
        }
    }

    pub fn policy(&self) -> &DependencyPolicy {
        &self.policy
    }

    /// Detect what `feature` depends on among `all`, one edge per target.
    pub fn detect(&self, feature: &Feature, all: &[Feature]) -> Vec<DependencyEdge> {
        if feature.is_auto_fix() {
            return Vec::new();
        }

        let known: HashMap<FeatureId, &Feature> = all
            .iter()
            .filter(|candidate| candidate.id != feature.id && !candidate.is_auto_fix())
            .map(|candidate| (candidate.id, candidate))
            .collect();

        let mut best: HashMap<FeatureId, DependencyEdge> = HashMap::new();
        let candidates = self
            .explicit_references(feature, &known)
            .into_iter()
            .chain(self.keyword_references(feature, &known))
            .chain(self.category_references(feature, &known));

        for edge in candidates {
            match best.get(&edge.depends_on) {
                Some(existing) if existing.confidence >= edge.confidence => {}
                _ => {
                    best.insert(edge.depends_on, edge);
                }
            }
        }

        let mut edges: Vec<DependencyEdge> = best.into_values().collect();
        edges.sort_by_key(|edge| edge.depends_on);
        edges
    }

    /// Run detection for every feature against every other one.
    pub fn detect_all(&self, features: &[Feature]) -> Vec<DependencyEdge> {
        features
            .iter()
            .flat_map(|feature| self.detect(feature, features))
            .collect()
    }

    fn explicit_references(
        &self,
        feature: &Feature,
        known: &HashMap<FeatureId, &Feature>,
    ) -> Vec<DependencyEdge> {
        let text = feature.text();
        let mut edges = Vec::new();
        for pattern in &self.explicit_patterns {
            for caps in pattern.captures_iter(&text) {
                let Some(id) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) else {
                    continue;
                };
                let target = FeatureId(id);
                if known.contains_key(&target) {
                    edges.push(DependencyEdge::new(
                        feature.id,
                        target,
                        self.policy.explicit_confidence,
                        DetectionMethod::ExplicitId,
                    ));
                }
            }
        }
        edges
    }

    fn keyword_references(
        &self,
        feature: &Feature,
        known: &HashMap<FeatureId, &Feature>,
    ) -> Vec<DependencyEdge> {
        let text = feature.text().to_lowercase();
        if !self.keyword_patterns.iter().any(|p| p.is_match(&text)) {
            return Vec::new();
        }

        let own_category = feature.category.as_deref().map(str::to_lowercase);
        let mut edges = Vec::new();
        for candidate in known.values() {
            let name = candidate.name.trim().to_lowercase();
            let name_hit = name.len() >= 3 && mentions(&text, &name);
            let category_hit = candidate
                .category
                .as_deref()
                .map(str::to_lowercase)
                .filter(|category| Some(category) != own_category.as_ref())
                .is_some_and(|category| mentions(&text, &category));

            if name_hit || category_hit {
                edges.push(DependencyEdge::new(
                    feature.id,
                    candidate.id,
                    self.policy.keyword_confidence,
                    DetectionMethod::Keyword,
                ));
            }
        }
        edges
    }

    fn category_references(
        &self,
        feature: &Feature,
        known: &HashMap<FeatureId, &Feature>,
    ) -> Vec<DependencyEdge> {
        let Some(category) = feature.category.as_deref().map(str::to_lowercase) else {
            return Vec::new();
        };
        let Some(prerequisites) = self.policy.category_prerequisites.get(&category) else {
            return Vec::new();
        };

        known
            .values()
            .filter(|candidate| {
                candidate
                    .category
                    .as_deref()
                    .map(str::to_lowercase)
                    .is_some_and(|c| prerequisites.iter().any(|p| p.eq_ignore_ascii_case(&c)))
            })
            .map(|candidate| {
                DependencyEdge::new(
                    feature.id,
                    candidate.id,
                    self.policy.category_confidence,
                    DetectionMethod::Category,
                )
            })
            .collect()
    }
}

fn word_pattern(phrase: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(&phrase.to_lowercase()))).ok()
}

fn mentions(text: &str, phrase: &str) -> bool {
    word_pattern(phrase).is_some_and(|pattern| pattern.is_match(text))
}
