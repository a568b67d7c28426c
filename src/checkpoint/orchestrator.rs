//! Runs the enabled quality checks concurrently and aggregates a decision.
//!
//! Every check runs in its own task with a per-check timeout. A check that
//! errors, panics or times out becomes one synthetic CRITICAL issue; it never
//! aborts the gate or holds up the other checks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{CheckResult, CheckpointRun, Issue, TriggerReason};

/// Errors a single check can return.
#[derive(Error, Debug)]
pub enum CheckError {
    /// IO error while reading the project.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk error.
    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),

    /// Any other failure, with a reason.
    #[error("{0}")]
    Failed(String),
}

/// Input shared by every check in one run.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub project_root: PathBuf,
    pub sequence: u32,
    pub features_completed: u32,
}

/// A swappable quality analysis.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &CheckContext) -> Result<Vec<Issue>, CheckError>;
}

pub struct CheckpointOrchestrator {
    checks: Vec<Arc<dyn QualityCheck>>,
    check_timeout: Duration,
    auto_pause_on_critical: bool,
}

impl CheckpointOrchestrator {
    pub fn new(check_timeout: Duration, auto_pause_on_critical: bool) -> Self {
        Self {
            checks: Vec::new(),
            check_timeout,
            auto_pause_on_critical,
        }
    }

    pub fn with_check(mut self, check: Arc<dyn QualityCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = Arc<dyn QualityCheck>>) -> Self {
        self.checks.extend(checks);
        self
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check and aggregate. Results keep registration order.
    pub async fn run(&self, ctx: CheckContext, trigger: TriggerReason) -> CheckpointRun {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            sequence = ctx.sequence,
            features_completed = ctx.features_completed,
            checks = self.checks.len(),
            %trigger,
            "checkpoint started"
        );

        let names: Vec<String> = self.checks.iter().map(|c| c.name().to_string()).collect();
        let mut slots: Vec<Option<CheckResult>> = vec![None; self.checks.len()];
        let mut join_set = JoinSet::new();

        for (index, check) in self.checks.iter().enumerate() {
            let check = Arc::clone(check);
            let ctx = ctx.clone();
            let timeout = self.check_timeout;
            let name = names[index].clone();
            join_set.spawn(async move {
                let check_start = Instant::now();
                let mut inner = tokio::spawn(async move { check.run(&ctx).await });
                let result = match tokio::time::timeout(timeout, &mut inner).await {
                    Ok(Ok(Ok(issues))) => {
                        CheckResult::from_issues(name, issues, check_start.elapsed())
                    }
                    Ok(Ok(Err(err))) => CheckResult::errored(name, err, check_start.elapsed()),
                    Ok(Err(join_err)) => {
                        let reason = if join_err.is_panic() {
                            "check panicked".to_string()
                        } else {
                            join_err.to_string()
                        };
                        CheckResult::errored(name, reason, check_start.elapsed())
                    }
                    Err(_) => {
                        inner.abort();
                        CheckResult::errored(
                            name,
                            format!("timed out after {}s", timeout.as_secs_f64()),
                            check_start.elapsed(),
                        )
                    }
                };
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    debug!(
                        check = %result.check_name,
                        status = ?result.status,
                        issues = result.issues.len(),
                        duration_ms = result.duration_ms,
                        "check finished"
                    );
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Err(err) => error!(error = %err, "check task failed"),
            }
        }

        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| CheckResult::errored(name, "check task failed", Duration::ZERO))
            })
            .collect();

        let run = CheckpointRun::aggregate(
            ctx.sequence,
            ctx.features_completed,
            trigger,
            started_at,
            start.elapsed(),
            results,
            self.auto_pause_on_critical,
        );

        if run.critical_count > 0 {
            warn!(
                sequence = run.sequence,
                critical = run.critical_count,
                warning = run.warning_count,
                decision = %run.decision,
                "checkpoint found critical issues"
            );
        } else {
            info!(
                sequence = run.sequence,
                warning = run.warning_count,
                decision = %run.decision,
                "checkpoint finished"
            );
        }
        run
    }
}
