//! Markdown report written once per checkpoint run.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{CheckStatus, CheckpointRun, Severity};

pub struct CheckpointReport;

impl CheckpointReport {
    /// `checkpoint_003_features_30.md`
    pub fn file_name(run: &CheckpointRun) -> String {
        format!(
            "checkpoint_{:03}_features_{}.md",
            run.sequence, run.features_completed
        )
    }

    pub fn render(run: &CheckpointRun) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Checkpoint {}\n\n", run.sequence));
        out.push_str(&format!(
            "- Started: {}\n- Trigger: {}\n- Features completed: {}\n- Duration: {:.1}s\n\n",
            run.started_at.to_rfc3339(),
            run.trigger,
            run.features_completed,
            run.duration_ms as f64 / 1000.0
        ));
        out.push_str(&format!("## Decision: {}\n\n", run.decision));
        out.push_str(&format!(
            "{} critical, {} warning, {} info\n\n",
            run.critical_count, run.warning_count, run.info_count
        ));

        out.push_str("## Checks\n\n| Check | Status | Issues | Time |\n|---|---|---|---|\n");
        for result in &run.results {
            let status = match result.status {
                CheckStatus::Passed => "passed",
                CheckStatus::Failed => "failed",
                CheckStatus::Errored => "errored",
            };
            out.push_str(&format!(
                "| {} | {} | {} | {}ms |\n",
                result.check_name,
                status,
                result.issues.len(),
                result.duration_ms
            ));
        }
        out.push('\n');

        for severity in [Severity::Critical, Severity::Warning, Severity::Info] {
            let issues: Vec<_> = run
                .results
                .iter()
                .flat_map(|r| r.issues.iter().map(move |i| (r.check_name.as_str(), i)))
                .filter(|(_, i)| i.severity == severity)
                .collect();
            if issues.is_empty() {
                continue;
            }
            out.push_str(&format!("## {} issues\n\n", severity));
            for (check, issue) in issues {
                let location = match (&issue.file, issue.line) {
                    (Some(file), Some(line)) => format!(" `{}:{}`", file, line),
                    (Some(file), None) => format!(" `{}`", file),
                    _ => String::new(),
                };
                out.push_str(&format!("- [{}]{} {}\n", check, location, issue.message));
                if let Some(suggestion) = &issue.suggestion {
                    out.push_str(&format!("  - Fix: {}\n", suggestion));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Write the report into `dir`. Fails if a report for the same sequence
    /// and count already exists; reports are never rewritten.
    pub fn write(dir: &Path, run: &CheckpointRun) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(run));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(Self::render(run).as_bytes())?;
        file.sync_all()?;
        Ok(path)
    }
}
