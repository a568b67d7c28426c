//! Project state: the feature table, dependency graph, blockers and
//! assumptions.
//!
//! This is the only shared mutable resource in the control plane. The
//! scheduler owns it behind a single mutex, so every claim, skip, block and
//! resolve is serialized. [`ProjectState::try_claim`] is the atomic
//! compare-and-claim used to prevent double dispatch.

pub mod store;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::blocker::{
    Assumption, AssumptionStatus, Blocker, BlockerClassification, ResolutionAction,
};
use crate::dependency::DependencyGraph;
use crate::feature::{Feature, FeatureId, FeatureSpec};

pub use store::{StateError, StateResult, StateStore};

/// Result of an attempt to mark a feature in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Claimed,
    /// Another worker already holds the feature.
    AlreadyClaimed,
    /// The feature passes, is blocked, or has unmet dependencies.
    NotEligible,
    NotFound,
}

/// Persistent project state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    features: Vec<Feature>,
    #[serde(default)]
    pub graph: DependencyGraph,
    #[serde(default)]
    blockers: Vec<Blocker>,
    #[serde(default)]
    assumptions: Vec<Assumption>,
    #[serde(default)]
    next_blocker_id: u64,
    #[serde(default)]
    next_assumption_id: u64,
    /// Highest feature id ever allocated, so purged ids are never reused.
    #[serde(default)]
    last_feature_id: u64,
    /// Features completed since the project started, drives checkpoint cadence.
    #[serde(default)]
    pub completed_count: u32,
    /// Last checkpoint sequence number issued.
    #[serde(default)]
    pub checkpoint_sequence: u32,
    #[serde(skip)]
    index: HashMap<FeatureId, usize>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build state from a list of features.
    pub fn with_features(features: Vec<Feature>) -> Self {
        let mut state = Self {
            features,
            ..Self::default()
        };
        state.reindex();
        state
    }

    pub(crate) fn after_load(&mut self) {
        self.reindex();
    }

    /// Clear claims left over from a process that is no longer running.
    /// Returns the features released.
    pub fn release_stale_claims(&mut self) -> Vec<FeatureId> {
        let mut released = Vec::new();
        for feature in &mut self.features {
            if feature.in_progress {
                feature.in_progress = false;
                released.push(feature.id);
            }
        }
        released
    }

    fn reindex(&mut self) {
        self.index = self
            .features
            .iter()
            .enumerate()
            .map(|(position, feature)| (feature.id, position))
            .collect();
    }

    // ------------------------------------------------------------------
    // Feature table
    // ------------------------------------------------------------------

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.index
            .get(&id)
            .and_then(|&position| self.features.get(position))
    }

    pub fn get_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        let position = *self.index.get(&id)?;
        self.features.get_mut(position)
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.index.contains_key(&id)
    }

    /// Insert a feature, replacing any existing one with the same id.
    pub fn insert(&mut self, feature: Feature) {
        match self.index.get(&feature.id) {
            Some(&position) => self.features[position] = feature,
            None => {
                self.index.insert(feature.id, self.features.len());
                self.features.push(feature);
            }
        }
    }

    /// Remove a feature and every edge touching it.
    pub fn remove(&mut self, id: FeatureId) -> Option<Feature> {
        let position = self.index.get(&id).copied()?;
        let feature = self.features.remove(position);
        self.graph.remove_feature(id);
        self.reindex();
        Some(feature)
    }

    /// Merge intake records. New ids are inserted; existing ids only take the
    /// new name, description, category and priority. Returns ids inserted.
    pub fn import(&mut self, specs: Vec<FeatureSpec>) -> Vec<FeatureId> {
        let mut inserted = Vec::new();
        for spec in specs {
            let id = FeatureId(spec.id);
            if let Some(existing) = self.get_mut(id) {
                existing.name = spec.name;
                existing.description = spec.description;
                existing.category = spec.category;
                if let Some(priority) = spec.priority {
                    existing.priority = priority;
                }
                continue;
            }

            let priority = spec.priority.unwrap_or_else(|| self.max_priority() + 1.0);
            let mut feature = Feature::new(id, spec.name, priority).with_description(spec.description);
            feature.category = spec.category;
            feature.passes = spec.passes;
            self.insert(feature);
            inserted.push(id);
        }
        inserted
    }

    /// Allocate an id above every id in the table and every id handed out
    /// before.
    pub fn allocate_feature_id(&mut self) -> FeatureId {
        let highest = self.features.iter().map(|f| f.id.0).max().unwrap_or(0);
        self.last_feature_id = self.last_feature_id.max(highest) + 1;
        FeatureId(self.last_feature_id)
    }

    // ------------------------------------------------------------------
    // Priority order
    // ------------------------------------------------------------------

    pub fn max_priority(&self) -> f64 {
        self.features
            .iter()
            .map(|f| f.priority)
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    /// Lowest priority among unfinished features, or `None` if all pass.
    pub fn front_priority(&self) -> Option<f64> {
        self.features
            .iter()
            .filter(|f| !f.passes)
            .map(|f| f.priority)
            .reduce(f64::min)
    }

    /// Move a feature behind everything else.
    pub fn move_to_back(&mut self, id: FeatureId) {
        let back = self.max_priority() + 1.0;
        if let Some(feature) = self.get_mut(id) {
            feature.priority = back;
        }
    }

    /// Move a feature ahead of every other unfinished feature.
    pub fn move_to_front(&mut self, id: FeatureId) {
        let front = self
            .features
            .iter()
            .filter(|f| !f.passes && f.id != id)
            .map(|f| f.priority)
            .reduce(f64::min);
        if let Some(front) = front {
            if let Some(feature) = self.get_mut(id) {
                feature.priority = feature.priority.min(front - 1.0);
            }
        }
    }

    // ------------------------------------------------------------------
    // Eligibility and claims
    // ------------------------------------------------------------------

    /// Dependencies that gate `id`: edges at or above `min_confidence`,
    /// excluding dependencies the feature implements against mocks.
    pub fn resolved_dependencies(&self, id: FeatureId, min_confidence: f64) -> Vec<FeatureId> {
        let mocked = self
            .get(id)
            .map(|f| f.mocked_dependencies.clone())
            .unwrap_or_default();
        self.graph
            .dependencies(id)
            .into_iter()
            .filter(|edge| edge.confidence >= min_confidence)
            .filter(|edge| !mocked.contains(&edge.depends_on))
            .filter(|edge| self.contains(edge.depends_on))
            .map(|edge| edge.depends_on)
            .collect()
    }

    /// `!passes && !in_progress && !is_blocked` and every resolved dependency passes.
    pub fn is_eligible(&self, id: FeatureId, min_confidence: f64) -> bool {
        let Some(feature) = self.get(id) else {
            return false;
        };
        feature.is_dispatchable()
            && self
                .resolved_dependencies(id, min_confidence)
                .into_iter()
                .all(|dep| self.get(dep).is_some_and(|d| d.passes))
    }

    /// Eligible features ordered by ascending priority, ties by id.
    pub fn eligible(&self, min_confidence: f64) -> Vec<&Feature> {
        let mut eligible: Vec<&Feature> = self
            .features
            .iter()
            .filter(|f| self.is_eligible(f.id, min_confidence))
            .collect();
        eligible.sort_by(|a, b| {
            a.priority
                .total_cmp(&b.priority)
                .then_with(|| a.id.cmp(&b.id))
        });
        eligible
    }

    /// Mark a feature in progress only if it is currently eligible.
    pub fn try_claim(&mut self, id: FeatureId, min_confidence: f64) -> ClaimResult {
        let Some(feature) = self.get(id) else {
            return ClaimResult::NotFound;
        };
        if feature.in_progress {
            return ClaimResult::AlreadyClaimed;
        }
        if !self.is_eligible(id, min_confidence) {
            return ClaimResult::NotEligible;
        }
        if let Some(feature) = self.get_mut(id) {
            feature.in_progress = true;
        }
        ClaimResult::Claimed
    }

    /// Claim the head of the eligible list.
    pub fn claim_next(&mut self, min_confidence: f64) -> Option<FeatureId> {
        let candidates: Vec<FeatureId> =
            self.eligible(min_confidence).iter().map(|f| f.id).collect();
        candidates
            .into_iter()
            .find(|&id| self.try_claim(id, min_confidence) == ClaimResult::Claimed)
    }

    pub fn release(&mut self, id: FeatureId) {
        if let Some(feature) = self.get_mut(id) {
            feature.in_progress = false;
        }
    }

    pub fn in_flight(&self) -> Vec<FeatureId> {
        self.features
            .iter()
            .filter(|f| f.in_progress)
            .map(|f| f.id)
            .collect()
    }

    /// Record a pass. Returns dependents that became eligible as a result.
    pub fn mark_passed(&mut self, id: FeatureId, min_confidence: f64) -> Vec<FeatureId> {
        let Some(feature) = self.get_mut(id) else {
            return Vec::new();
        };
        feature.passes = true;
        feature.in_progress = false;
        feature.attempts = 0;
        if !feature.mocked_dependencies.is_empty() {
            feature.passing_with_mocks = true;
        }
        self.completed_count = self.completed_count.saturating_add(1);

        for assumption in &mut self.assumptions {
            if assumption.about == Some(id) && assumption.status == AssumptionStatus::Active {
                assumption.set_status(AssumptionStatus::NeedsReview);
            }
        }

        self.graph
            .dependents(id)
            .into_iter()
            .map(|edge| edge.feature)
            .filter(|&dependent| self.is_eligible(dependent, min_confidence))
            .collect()
    }

    // ------------------------------------------------------------------
    // Blockers
    // ------------------------------------------------------------------

    pub fn blockers(&self) -> &[Blocker] {
        &self.blockers
    }

    pub fn blocker(&self, blocker_id: u64) -> Option<&Blocker> {
        self.blockers.iter().find(|b| b.id == blocker_id)
    }

    pub fn blockers_for(&self, id: FeatureId) -> Vec<&Blocker> {
        self.blockers.iter().filter(|b| b.feature_id == id).collect()
    }

    pub fn active_blockers_for(&self, id: FeatureId) -> Vec<&Blocker> {
        self.blockers
            .iter()
            .filter(|b| b.feature_id == id && b.is_active())
            .collect()
    }

    /// Record an ACTIVE blocker and mark the feature blocked.
    pub fn add_blocker(
        &mut self,
        id: FeatureId,
        classification: &BlockerClassification,
        description: impl Into<String>,
    ) -> Option<u64> {
        let description = description.into();
        let feature = self.get_mut(id)?;
        feature.is_blocked = true;
        feature.blocker_type = Some(classification.blocker_type);
        feature.blocker_description = Some(description.clone());

        self.next_blocker_id += 1;
        let blocker_id = self.next_blocker_id;
        self.blockers.push(Blocker::new(
            blocker_id,
            id,
            classification.blocker_type,
            description,
            classification.required_values.clone(),
        ));
        Some(blocker_id)
    }

    /// Mark one blocker RESOLVED. Returns `false` if it does not exist.
    pub fn resolve_blocker(&mut self, blocker_id: u64, action: ResolutionAction) -> bool {
        match self.blockers.iter_mut().find(|b| b.id == blocker_id) {
            Some(blocker) => {
                blocker.resolve(action);
                true
            }
            None => false,
        }
    }

    /// Resolve every ACTIVE blocker on a feature. Returns the resolved ids.
    pub fn resolve_all_blockers(&mut self, id: FeatureId, action: ResolutionAction) -> Vec<u64> {
        let mut resolved = Vec::new();
        for blocker in self.blockers.iter_mut() {
            if blocker.feature_id == id && blocker.is_active() {
                blocker.resolve(action);
                resolved.push(blocker.id);
            }
        }
        resolved
    }

    /// Clear `is_blocked` once no ACTIVE blocker remains. Returns whether the
    /// feature is now unblocked.
    pub fn clear_block_if_resolved(&mut self, id: FeatureId) -> bool {
        if !self.active_blockers_for(id).is_empty() {
            return false;
        }
        match self.get_mut(id) {
            Some(feature) => {
                feature.is_blocked = false;
                feature.blocker_type = None;
                feature.blocker_description = None;
                true
            }
            None => false,
        }
    }

    pub fn blocked_features(&self) -> Vec<&Feature> {
        self.features.iter().filter(|f| f.is_blocked).collect()
    }

    // ------------------------------------------------------------------
    // Assumptions
    // ------------------------------------------------------------------

    pub fn assumptions(&self) -> &[Assumption] {
        &self.assumptions
    }

    pub fn add_assumption(
        &mut self,
        feature_id: FeatureId,
        about: Option<FeatureId>,
        description: impl Into<String>,
    ) -> u64 {
        self.next_assumption_id += 1;
        let id = self.next_assumption_id;
        self.assumptions
            .push(Assumption::new(id, feature_id, about, description));
        if let (Some(about), Some(feature)) = (about, self.get_mut(feature_id)) {
            feature.mocked_dependencies.insert(about);
        }
        id
    }

    /// Resolve an assumption. An invalid assumption reopens the feature that
    /// made it.
    pub fn resolve_assumption(&mut self, assumption_id: u64, valid: bool) -> Option<&Assumption> {
        let position = self.assumptions.iter().position(|a| a.id == assumption_id)?;
        let status = if valid {
            AssumptionStatus::Validated
        } else {
            AssumptionStatus::Invalid
        };
        self.assumptions[position].set_status(status);

        let feature_id = self.assumptions[position].feature_id;
        let about = self.assumptions[position].about;
        let still_open: BTreeSet<FeatureId> = self
            .assumptions
            .iter()
            .filter(|a| a.feature_id == feature_id && a.status.is_open())
            .filter_map(|a| a.about)
            .collect();

        if let Some(feature) = self.get_mut(feature_id) {
            if let Some(about) = about {
                if !still_open.contains(&about) {
                    feature.mocked_dependencies.remove(&about);
                }
            }
            if !valid {
                feature.passes = false;
                feature.passing_with_mocks = false;
            }
        }
        self.assumptions.get(position)
    }

    // ------------------------------------------------------------------
    // Summary
    // ------------------------------------------------------------------

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts {
            total: self.features.len(),
            ..StateCounts::default()
        };
        for feature in &self.features {
            if feature.passes {
                counts.passing += 1;
            }
            if feature.in_progress {
                counts.in_progress += 1;
            }
            if feature.is_blocked {
                counts.blocked += 1;
            }
            if feature.was_skipped {
                counts.skipped += 1;
            }
            if feature.passing_with_mocks {
                counts.with_mocks += 1;
            }
        }
        counts
    }
}

/// Aggregate feature counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub total: usize,
    pub passing: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub with_mocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::{classify, BlockerType};
    use crate::dependency::{DependencyEdge, DetectionMethod};

    const MIN: f64 = 0.6;

    fn state() -> ProjectState {
        let mut state = ProjectState::with_features(vec![
            Feature::new(1, "Auth", 1.0),
            Feature::new(2, "Profile", 2.0),
            Feature::new(3, "Settings", 3.0),
        ]);
        state.graph.upsert(DependencyEdge::new(
            FeatureId(2),
            FeatureId(1),
            0.95,
            DetectionMethod::ExplicitId,
        ));
        state
    }

    #[test]
    fn test_eligibility_requires_dependencies_to_pass() {
        let mut state = state();
        assert!(state.is_eligible(FeatureId(1), MIN));
        assert!(!state.is_eligible(FeatureId(2), MIN));

        let unlocked = state.mark_passed(FeatureId(1), MIN);
        assert_eq!(unlocked, vec![FeatureId(2)]);
        assert!(state.is_eligible(FeatureId(2), MIN));
    }

    #[test]
    fn test_low_confidence_edges_do_not_gate() {
        let mut state = state();
        state.graph.upsert(DependencyEdge::new(
            FeatureId(3),
            FeatureId(1),
            0.5,
            DetectionMethod::Keyword,
        ));
        assert!(state.is_eligible(FeatureId(3), MIN));
    }

    #[test]
    fn test_eligibility_invariant_holds_for_every_flag() {
        let mut state = state();
        state.mark_passed(FeatureId(1), MIN);
        for id in [1, 2, 3] {
            let id = FeatureId(id);
            let f = state.get(id).expect("feature").clone();
            let deps_pass = state
                .resolved_dependencies(id, MIN)
                .iter()
                .all(|d| state.get(*d).is_some_and(|d| d.passes));
            let expected = !f.passes && !f.in_progress && !f.is_blocked && deps_pass;
            assert_eq!(state.is_eligible(id, MIN), expected, "feature {}", id);
        }
    }

    #[test]
    fn test_eligible_ordered_by_priority() {
        let mut state = ProjectState::with_features(vec![
            Feature::new(1, "A", 3.0),
            Feature::new(2, "B", 1.0),
            Feature::new(3, "C", 2.0),
            Feature::new(4, "D", 0.5),
        ]);
        state.get_mut(FeatureId(4)).expect("feature").passes = true;
        let order: Vec<u64> = state.eligible(MIN).iter().map(|f| f.id.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_try_claim_is_compare_and_claim() {
        let mut state = state();
        assert_eq!(state.try_claim(FeatureId(1), MIN), ClaimResult::Claimed);
        assert_eq!(state.try_claim(FeatureId(1), MIN), ClaimResult::AlreadyClaimed);
        assert_eq!(state.try_claim(FeatureId(2), MIN), ClaimResult::NotEligible);
        assert_eq!(state.try_claim(FeatureId(42), MIN), ClaimResult::NotFound);
    }

    #[test]
    fn test_claim_next_skips_claimed_head() {
        let mut state = state();
        assert_eq!(state.claim_next(MIN), Some(FeatureId(1)));
        assert_eq!(state.claim_next(MIN), Some(FeatureId(3)));
        assert_eq!(state.claim_next(MIN), None);
        assert_eq!(state.in_flight(), vec![FeatureId(1), FeatureId(3)]);
    }

    #[test]
    fn test_blocked_until_all_blockers_resolved() {
        let mut state = state();
        let env = classify("Missing STRIPE_KEY");
        let first = state.add_blocker(FeatureId(3), &env, "keys").expect("blocker");
        let second = state.add_blocker(FeatureId(3), &env, "more keys").expect("blocker");
        assert!(!state.is_eligible(FeatureId(3), MIN));

        state.resolve_blocker(first, ResolutionAction::Provided);
        assert!(!state.clear_block_if_resolved(FeatureId(3)));
        assert!(!state.is_eligible(FeatureId(3), MIN));

        state.resolve_blocker(second, ResolutionAction::Provided);
        assert!(state.clear_block_if_resolved(FeatureId(3)));
        assert!(state.is_eligible(FeatureId(3), MIN));
        assert_eq!(state.get(FeatureId(3)).expect("feature").blocker_type, None);
    }

    #[test]
    fn test_add_blocker_records_type() {
        let mut state = state();
        let classification = classify("need Stripe account and API key");
        state.add_blocker(FeatureId(1), &classification, "Stripe");
        let feature = state.get(FeatureId(1)).expect("feature");
        assert!(feature.is_blocked);
        assert_eq!(feature.blocker_type, Some(BlockerType::ExternalService));
    }

    #[test]
    fn test_assumption_lifts_dependency_and_moves_to_review() {
        let mut state = state();
        let assumption = state.add_assumption(FeatureId(2), Some(FeatureId(1)), "mock auth");
        assert!(state.is_eligible(FeatureId(2), MIN));

        state.mark_passed(FeatureId(2), MIN);
        assert!(state.get(FeatureId(2)).expect("feature").passing_with_mocks);

        state.mark_passed(FeatureId(1), MIN);
        let status = state.assumptions()[0].status;
        assert_eq!(status, AssumptionStatus::NeedsReview);

        let resolved = state.resolve_assumption(assumption, false).expect("assumption");
        assert_eq!(resolved.status, AssumptionStatus::Invalid);
        let feature = state.get(FeatureId(2)).expect("feature");
        assert!(!feature.passes);
        assert!(feature.mocked_dependencies.is_empty());
    }

    #[test]
    fn test_move_to_front_and_back() {
        let mut state = state();
        state.move_to_back(FeatureId(1));
        assert_eq!(state.get(FeatureId(1)).expect("feature").priority, 4.0);

        state.move_to_front(FeatureId(3));
        assert_eq!(state.get(FeatureId(3)).expect("feature").priority, 1.0);
    }

    #[test]
    fn test_release_stale_claims() {
        let mut state = state();
        state.try_claim(FeatureId(1), MIN);
        state.try_claim(FeatureId(3), MIN);
        assert_eq!(state.release_stale_claims(), vec![FeatureId(1), FeatureId(3)]);
        assert!(state.in_flight().is_empty());
        assert!(state.release_stale_claims().is_empty());
    }

    #[test]
    fn test_allocated_ids_never_reused_after_remove() {
        let mut state = state();
        assert_eq!(state.allocate_feature_id(), FeatureId(4));
        state.remove(FeatureId(3));
        assert_eq!(state.allocate_feature_id(), FeatureId(5));
        state.insert(Feature::new(9, "Imported", 4.0));
        assert_eq!(state.allocate_feature_id(), FeatureId(10));
    }

    #[test]
    fn test_remove_reindexes() {
        let mut state = state();
        let removed = state.remove(FeatureId(1)).expect("removed");
        assert_eq!(removed.id, FeatureId(1));
        assert!(state.get(FeatureId(3)).is_some());
        assert!(state.graph.is_empty());
    }

    #[test]
    fn test_import_inserts_and_updates() {
        let mut state = state();
        let specs: Vec<FeatureSpec> = serde_json::from_str(
            r#"[{"id": 3, "name": "Settings v2", "priority": 0.5},
                {"id": 9, "name": "Billing", "category": "billing"}]"#,
        )
        .expect("parse");
        let inserted = state.import(specs);
        assert_eq!(inserted, vec![FeatureId(9)]);
        assert_eq!(state.get(FeatureId(3)).expect("feature").name, "Settings v2");
        assert_eq!(state.get(FeatureId(9)).expect("feature").priority, 3.0);
    }
}
