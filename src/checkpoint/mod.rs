//! Checkpoint gate: periodic quality checks that decide whether work may
//! continue, plus the auto-fix work they generate.

pub mod autofix;
pub mod checks;
pub mod orchestrator;
pub mod report;
pub mod store;
pub mod trigger;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use autofix::{AutoFixGenerator, AutoFixReport};
pub use checks::{build_checks, BundleSizeCheck, CodeSmellCheck, SecretPatternCheck};
pub use orchestrator::{CheckContext, CheckError, CheckpointOrchestrator, QualityCheck};
pub use report::CheckpointReport;
pub use store::{CheckpointStore, CheckpointStoreError};
pub use trigger::{CheckpointTrigger, TriggerReason};

/// Severity of a single issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        };
        f.write_str(label)
    }
}

/// One finding reported by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    /// File the issue points at (relative to the project root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Suggested fix or remediation action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
            suggestion: None,
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Outcome of running one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    /// Completed and reported at least one critical or warning issue
    Failed,
    /// Returned an error, panicked, or timed out
    Errored,
}

/// The result of running a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Wall time spent in the check, in milliseconds
    pub duration_ms: u64,
}

impl CheckResult {
    /// Status derives from the issues: any critical or warning fails the check.
    pub fn from_issues(check_name: impl Into<String>, issues: Vec<Issue>, duration: Duration) -> Self {
        let failed = issues
            .iter()
            .any(|i| matches!(i.severity, Severity::Critical | Severity::Warning));
        Self {
            check_name: check_name.into(),
            status: if failed {
                CheckStatus::Failed
            } else {
                CheckStatus::Passed
            },
            issues,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// A single synthetic CRITICAL issue standing in for a check that failed to run.
    pub fn errored(check_name: impl Into<String>, reason: impl fmt::Display, duration: Duration) -> Self {
        let check_name = check_name.into();
        Self {
            issues: vec![Issue::critical(format!("check failed: {}", reason))
                .with_suggestion(format!("Investigate why the {} check could not run", check_name))],
            check_name,
            status: CheckStatus::Errored,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// What the gate decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointDecision {
    Pause,
    Continue,
    ContinueWithWarnings,
}

impl CheckpointDecision {
    /// Decision table, evaluated in order.
    pub fn decide(critical: usize, warning: usize, auto_pause_on_critical: bool) -> Self {
        if critical > 0 && auto_pause_on_critical {
            CheckpointDecision::Pause
        } else if critical > 0 || warning > 0 {
            CheckpointDecision::ContinueWithWarnings
        } else {
            CheckpointDecision::Continue
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            CheckpointDecision::Pause => "PAUSE",
            CheckpointDecision::Continue => "CONTINUE",
            CheckpointDecision::ContinueWithWarnings => "CONTINUE_WITH_WARNINGS",
        }
    }
}

impl fmt::Display for CheckpointDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One gate evaluation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRun {
    pub sequence: u32,
    /// Features completed when the gate ran
    pub features_completed: u32,
    pub trigger: TriggerReason,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<CheckResult>,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub decision: CheckpointDecision,
}

impl CheckpointRun {
    /// Aggregate per-check results and decide.
    pub fn aggregate(
        sequence: u32,
        features_completed: u32,
        trigger: TriggerReason,
        started_at: DateTime<Utc>,
        duration: Duration,
        results: Vec<CheckResult>,
        auto_pause_on_critical: bool,
    ) -> Self {
        let sum = |severity| results.iter().map(|r| r.count(severity)).sum::<usize>();
        let critical_count = sum(Severity::Critical);
        let warning_count = sum(Severity::Warning);
        let info_count = sum(Severity::Info);
        Self {
            sequence,
            features_completed,
            trigger,
            started_at,
            duration_ms: duration.as_millis() as u64,
            decision: CheckpointDecision::decide(
                critical_count,
                warning_count,
                auto_pause_on_critical,
            ),
            results,
            critical_count,
            warning_count,
            info_count,
        }
    }

    /// Critical issues across every check, paired with the check name.
    pub fn critical_issues(&self) -> impl Iterator<Item = (&str, &Issue)> {
        self.results.iter().flat_map(|r| {
            r.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .map(move |i| (r.check_name.as_str(), i))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_table_all_combinations() {
        let cases = [
            (0, 0, false, CheckpointDecision::Continue),
            (0, 0, true, CheckpointDecision::Continue),
            (0, 2, false, CheckpointDecision::ContinueWithWarnings),
            (0, 2, true, CheckpointDecision::ContinueWithWarnings),
            (1, 0, false, CheckpointDecision::ContinueWithWarnings),
            (1, 0, true, CheckpointDecision::Pause),
            (1, 2, false, CheckpointDecision::ContinueWithWarnings),
            (1, 2, true, CheckpointDecision::Pause),
        ];
        for (critical, warning, auto_pause, expected) in cases {
            assert_eq!(
                CheckpointDecision::decide(critical, warning, auto_pause),
                expected,
                "critical={} warning={} auto_pause={}",
                critical,
                warning,
                auto_pause
            );
        }
    }

    #[test]
    fn test_result_status_from_issues() {
        let info_only = CheckResult::from_issues(
            "secrets",
            vec![Issue::info("scanned 10 files")],
            Duration::from_millis(5),
        );
        assert_eq!(info_only.status, CheckStatus::Passed);

        let warned = CheckResult::from_issues(
            "secrets",
            vec![Issue::warning("long file")],
            Duration::from_millis(5),
        );
        assert_eq!(warned.status, CheckStatus::Failed);
    }

    #[test]
    fn test_aggregate_sums_counts() {
        let results = vec![
            CheckResult::from_issues(
                "a",
                vec![Issue::critical("x").with_file("src/a.rs"), Issue::info("y")],
                Duration::ZERO,
            ),
            CheckResult::errored("b", "timed out", Duration::ZERO),
            CheckResult::from_issues("c", vec![Issue::warning("z")], Duration::ZERO),
        ];
        let run = CheckpointRun::aggregate(
            1,
            10,
            TriggerReason::Frequency,
            Utc::now(),
            Duration::ZERO,
            results,
            true,
        );
        assert_eq!(run.critical_count, 2);
        assert_eq!(run.warning_count, 1);
        assert_eq!(run.info_count, 1);
        assert_eq!(run.decision, CheckpointDecision::Pause);
        assert_eq!(run.critical_issues().count(), 2);
    }
}
