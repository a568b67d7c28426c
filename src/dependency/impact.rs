//! Skip impact analysis and cascade skipping.
//!
//! The impact walk goes breadth-first over reverse edges (features that
//! depend on the skipped one) with a visited set and a depth bound, so it
//! terminates on any graph shape, including cycles from false-positive
//! edges.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::graph::DependencyGraph;
use crate::config::ImpactPolicy;
use crate::feature::FeatureId;
use crate::state::ProjectState;

/// What to do about a skipped feature's dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipRecommendation {
    /// Nothing depends on it.
    SafeToSkip,
    /// Too much depends on it; skip every dependent too.
    CascadeSkip,
    /// Few dependents; let them proceed against placeholders.
    ImplementWithMocks,
    /// Needs a human look at the dependency graph.
    ReviewDependencies,
}

impl fmt::Display for SkipRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipRecommendation::SafeToSkip => "SAFE_TO_SKIP",
            SkipRecommendation::CascadeSkip => "CASCADE_SKIP",
            SkipRecommendation::ImplementWithMocks => "IMPLEMENT_WITH_MOCKS",
            SkipRecommendation::ReviewDependencies => "REVIEW_DEPENDENCIES",
        };
        f.write_str(label)
    }
}

/// Blast radius of skipping one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipImpact {
    pub feature_id: FeatureId,
    /// Direct dependents.
    pub immediate_dependents: Vec<FeatureId>,
    /// Deduplicated descendants within the depth bound.
    pub all_dependents: Vec<FeatureId>,
    pub total_impact: usize,
    pub recommendation: SkipRecommendation,
}

/// Features touched by a cascade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeReport {
    pub root: Option<FeatureId>,
    pub skipped: Vec<FeatureId>,
}

pub struct SkipImpactAnalyzer {
    policy: ImpactPolicy,
    min_confidence: f64,
}

impl SkipImpactAnalyzer {
    pub fn new(policy: ImpactPolicy, min_confidence: f64) -> Self {
        Self {
            policy,
            min_confidence,
        }
    }

    pub fn policy(&self) -> &ImpactPolicy {
        &self.policy
    }

    fn dependents_of(&self, graph: &DependencyGraph, id: FeatureId) -> Vec<FeatureId> {
        graph
            .dependents(id)
            .into_iter()
            .filter(|edge| edge.confidence >= self.min_confidence)
            .map(|edge| edge.feature)
            .collect()
    }

    /// Decision policy, evaluated in order.
    pub fn recommend(&self, immediate: usize, total: usize) -> SkipRecommendation {
        if immediate == 0 {
            SkipRecommendation::SafeToSkip
        } else if immediate >= self.policy.cascade_immediate || total >= self.policy.cascade_total
        {
            SkipRecommendation::CascadeSkip
        } else if total <= self.policy.mocks_max_total {
            SkipRecommendation::ImplementWithMocks
        } else {
            SkipRecommendation::ReviewDependencies
        }
    }

    pub fn analyze(&self, graph: &DependencyGraph, id: FeatureId) -> SkipImpact {
        let mut immediate = self.dependents_of(graph, id);
        immediate.sort();
        immediate.dedup();

        let mut visited: HashSet<FeatureId> = HashSet::from([id]);
        let mut descendants: Vec<FeatureId> = Vec::new();
        let mut queue: VecDeque<(FeatureId, usize)> = VecDeque::from([(id, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= self.policy.max_depth {
                continue;
            }
            for dependent in self.dependents_of(graph, current) {
                if visited.insert(dependent) {
                    descendants.push(dependent);
                    queue.push_back((dependent, depth + 1));
                }
            }
        }
        descendants.sort();

        let total_impact = descendants.len();
        let recommendation = self.recommend(immediate.len(), total_impact);
        debug!(
            feature_id = %id,
            immediate = immediate.len(),
            total_impact,
            %recommendation,
            "skip impact analyzed"
        );

        SkipImpact {
            feature_id: id,
            immediate_dependents: immediate,
            all_dependents: descendants,
            total_impact,
            recommendation,
        }
    }

    /// Mark every transitive dependent of `root` as skipped, tag it with the
    /// root cause, and move it to the back of the queue.
    ///
    /// Features that already pass, are in progress, or are already skipped are
    /// left alone and not traversed through, which makes the cascade idempotent.
    pub fn cascade_skip(&self, state: &mut ProjectState, root: FeatureId) -> CascadeReport {
        let mut report = CascadeReport {
            root: Some(root),
            skipped: Vec::new(),
        };
        // A cascade chain can never be longer than the feature table.
        let depth_bound = state.features().len();
        let mut visited: HashSet<FeatureId> = HashSet::from([root]);
        let mut queue: VecDeque<(FeatureId, usize)> = VecDeque::from([(root, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= depth_bound {
                continue;
            }
            for dependent in self.dependents_of(&state.graph, current) {
                if !visited.insert(dependent) {
                    continue;
                }
                let back = state.max_priority() + 1.0;
                let Some(feature) = state.get_mut(dependent) else {
                    continue;
                };
                if feature.passes || feature.in_progress || feature.was_skipped {
                    continue;
                }
                feature.was_skipped = true;
                feature.skip_count += 1;
                feature.cascade_root = Some(root);
                feature.skip_reason = Some(format!("Cascade skip: depends on skipped #{}", root));
                feature.priority = back;

                report.skipped.push(dependent);
                queue.push_back((dependent, depth + 1));
            }
        }

        if !report.skipped.is_empty() {
            info!(
                root = %root,
                skipped = report.skipped.len(),
                "cascade skip applied"
            );
        }
        report
    }
}
