//! Turns critical checkpoint issues into high-priority fix features.
//!
//! Issues are grouped by location (the file they point at, or the check
//! name when they have none). Each group becomes one feature placed half a
//! step ahead of the current front of the queue, so fixes run before any
//! unrelated work without the scheduler knowing about checkpoints.

use std::collections::BTreeMap;

use tracing::info;

use super::{CheckpointRun, Issue};
use crate::feature::{AutoFixTag, Feature, FeatureId};
use crate::state::ProjectState;

/// Category given to generated features.
pub const AUTO_FIX_CATEGORY: &str = "auto_fix";

/// What one generation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoFixReport {
    pub created: Vec<FeatureId>,
    /// Locations that already had a pending fix.
    pub already_pending: Vec<String>,
    /// Passed fixes removed because their location is clean.
    pub purged: Vec<FeatureId>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoFixGenerator;

impl AutoFixGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Critical issues grouped by location.
    pub fn group<'a>(run: &'a CheckpointRun) -> BTreeMap<String, Vec<(&'a str, &'a Issue)>> {
        let mut groups: BTreeMap<String, Vec<(&str, &Issue)>> = BTreeMap::new();
        for (check, issue) in run.critical_issues() {
            let location = issue.file.clone().unwrap_or_else(|| check.to_string());
            groups.entry(location).or_default().push((check, issue));
        }
        groups
    }

    /// Create fix features for the run's critical issues and purge passed
    /// fixes whose location no longer reports a critical issue.
    pub fn apply(&self, state: &mut ProjectState, run: &CheckpointRun) -> AutoFixReport {
        let groups = Self::group(run);
        let mut report = AutoFixReport::default();

        let purgeable: Vec<FeatureId> = state
            .features()
            .iter()
            .filter(|f| f.passes)
            .filter_map(|f| f.auto_fix.as_ref().map(|tag| (f.id, tag)))
            .filter(|(_, tag)| !groups.contains_key(&tag.location))
            .map(|(id, _)| id)
            .collect();
        for id in purgeable {
            state.remove(id);
            report.purged.push(id);
        }

        if groups.is_empty() {
            return report;
        }

        let priority = state.front_priority().unwrap_or(0.0) - 0.5;
        for (location, issues) in groups {
            let pending = state.features().iter().any(|f| {
                !f.passes && f.auto_fix.as_ref().is_some_and(|tag| tag.location == location)
            });
            if pending {
                report.already_pending.push(location);
                continue;
            }

            let id = state.allocate_feature_id();
            let mut feature = Feature::new(
                id,
                format!("Fix {} critical issue(s) in {}", issues.len(), location),
                priority,
            )
            .with_description(describe(&location, &issues))
            .with_category(AUTO_FIX_CATEGORY);
            feature.auto_fix = Some(AutoFixTag {
                checkpoint: run.sequence,
                location: location.clone(),
            });
            state.insert(feature);
            report.created.push(id);
        }

        if !report.created.is_empty() || !report.purged.is_empty() {
            info!(
                checkpoint = run.sequence,
                created = report.created.len(),
                purged = report.purged.len(),
                "auto-fix features updated"
            );
        }
        report
    }
}

fn describe(location: &str, issues: &[(&str, &Issue)]) -> String {
    let mut text = format!("Resolve the critical issues reported for {}:\n", location);
    for (check, issue) in issues {
        match issue.line {
            Some(line) => text.push_str(&format!("- [{}] line {}: {}\n", check, line, issue.message)),
            None => text.push_str(&format!("- [{}] {}\n", check, issue.message)),
        }
        if let Some(suggestion) = &issue.suggestion {
            text.push_str(&format!("  Fix: {}\n", suggestion));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckResult, TriggerReason};
    use chrono::Utc;
    use std::time::Duration;

    fn run(sequence: u32, issues: Vec<Issue>) -> CheckpointRun {
        CheckpointRun::aggregate(
            sequence,
            10,
            TriggerReason::Frequency,
            Utc::now(),
            Duration::ZERO,
            vec![CheckResult::from_issues("secrets", issues, Duration::ZERO)],
            true,
        )
    }

    fn state() -> ProjectState {
        ProjectState::with_features(vec![
            Feature::new(1, "Landing", 1.0).passing(),
            Feature::new(2, "Profile", 2.0),
            Feature::new(3, "Settings", 3.0),
        ])
    }

    #[test]
    fn test_groups_by_location_ahead_of_queue() {
        let mut state = state();
        let run = run(
            1,
            vec![
                Issue::critical("key").with_file("src/a.ts").with_line(3),
                Issue::critical("token").with_file("src/a.ts").with_line(9),
                Issue::critical("pem").with_file("src/b.ts"),
                Issue::warning("long file").with_file("src/c.ts"),
            ],
        );

        let report = AutoFixGenerator::new().apply(&mut state, &run);
        assert_eq!(report.created, vec![FeatureId(4), FeatureId(5)]);

        let fix = state.get(FeatureId(4)).expect("fix");
        assert_eq!(fix.priority, 1.5);
        assert_eq!(fix.name, "Fix 2 critical issue(s) in src/a.ts");
        assert!(fix.description.contains("line 9: token"));
        assert!(fix.is_auto_fix());

        let order: Vec<u64> = state.eligible(0.6).iter().map(|f| f.id.0).collect();
        assert_eq!(order, vec![4, 5, 2, 3]);
    }

    #[test]
    fn test_issue_without_file_groups_by_check() {
        let mut state = state();
        let run = run(1, vec![Issue::critical("check failed: timed out")]);
        AutoFixGenerator::new().apply(&mut state, &run);
        let fix = state.get(FeatureId(4)).expect("fix");
        assert_eq!(fix.auto_fix.as_ref().expect("tag").location, "secrets");
    }

    #[test]
    fn test_pending_fix_not_duplicated() {
        let mut state = state();
        let generator = AutoFixGenerator::new();
        generator.apply(&mut state, &run(1, vec![Issue::critical("x").with_file("a")]));
        let report = generator.apply(&mut state, &run(2, vec![Issue::critical("x").with_file("a")]));
        assert!(report.created.is_empty());
        assert_eq!(report.already_pending, vec!["a".to_string()]);
    }

    #[test]
    fn test_passed_fix_purged_once_location_clean() {
        let mut state = state();
        let generator = AutoFixGenerator::new();
        generator.apply(&mut state, &run(1, vec![Issue::critical("x").with_file("a")]));
        state.mark_passed(FeatureId(4), 0.6);

        let still_failing = generator.apply(&mut state, &run(2, vec![Issue::critical("x").with_file("a")]));
        assert!(still_failing.purged.is_empty());
        assert_eq!(still_failing.created, vec![FeatureId(5)]);

        state.mark_passed(FeatureId(5), 0.6);
        let clean = generator.apply(&mut state, &run(3, Vec::new()));
        assert_eq!(clean.purged, vec![FeatureId(4), FeatureId(5)]);
        assert!(state.get(FeatureId(4)).is_none());
    }

    #[test]
    fn test_purged_fix_id_not_reused() {
        let mut state = state();
        let generator = AutoFixGenerator::new();
        generator.apply(&mut state, &run(1, vec![Issue::critical("x").with_file("a")]));
        state.mark_passed(FeatureId(4), 0.6);
        let clean = generator.apply(&mut state, &run(2, Vec::new()));
        assert_eq!(clean.purged, vec![FeatureId(4)]);

        let report = generator.apply(&mut state, &run(3, vec![Issue::critical("y").with_file("b")]));
        assert_eq!(report.created, vec![FeatureId(5)]);
    }

    #[test]
    fn test_clean_run_creates_nothing() {
        let mut state = state();
        let report = AutoFixGenerator::new().apply(&mut state, &run(1, vec![Issue::warning("w")]));
        assert_eq!(report, AutoFixReport::default());
        assert_eq!(state.features().len(), 3);
    }
}
