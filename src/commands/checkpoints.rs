//! Checkpoint and configuration commands.

use std::sync::Arc;

use ralph_autopilot::checkpoint::{CheckpointDecision, TriggerReason};
use ralph_autopilot::scheduler::{CommandWorker, ControlRequest, WorkScheduler};
use ralph_autopilot::Result;

use super::{Output, Project};

/// Run the gate on demand. No agent is invoked.
pub async fn checkpoint(project: &Project, out: &Output) -> Result<()> {
    if project.submit_if_running(out, ControlRequest::Checkpoint)? {
        println!("  {}", out.dim("results appear in `autopilot checkpoints`"));
        return Ok(());
    }
    let config = project.config().clone();
    let worker = CommandWorker::new(&config.scheduler.agent_command, project.root());
    let scheduler = WorkScheduler::open(project.root(), config, Arc::new(worker))?;
    let run = scheduler.run_checkpoint(TriggerReason::Manual).await?;

    for result in &run.results {
        println!(
            "{} {} {}",
            out.header(&result.check_name),
            format!("{:?}", result.status).to_lowercase(),
            out.dim(&format!("({} ms)", result.duration_ms))
        );
        for issue in &result.issues {
            let location = match (&issue.file, issue.line) {
                (Some(file), Some(line)) => format!(" {}:{}", file, line),
                (Some(file), None) => format!(" {}", file),
                _ => String::new(),
            };
            println!("  {}{} {}", issue.severity, out.dim(&location), issue.message);
        }
    }

    let decision = run.decision.as_label();
    let decision = match run.decision {
        CheckpointDecision::Continue => out.success(decision),
        CheckpointDecision::ContinueWithWarnings => out.warn(decision),
        CheckpointDecision::Pause => out.error(decision),
    };
    println!(
        "{} {} ({} critical, {} warning, {} info)",
        out.header(&format!("Checkpoint {}:", run.sequence)),
        decision,
        run.critical_count,
        run.warning_count,
        run.info_count
    );
    if run.decision == CheckpointDecision::Pause {
        println!(
            "  {}",
            out.dim("dispatch is paused; run `autopilot resume` once fixes are reviewed")
        );
    }
    Ok(())
}

pub fn checkpoints(project: &Project, out: &Output) -> Result<()> {
    let store = project.checkpoint_store();
    let runs = store.list_runs()?;
    if runs.is_empty() {
        println!("No checkpoints recorded.");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{:03}  {}  features {:>4}  {:<24} {:<22} {}C {}W {}I",
            run.sequence,
            out.dim(&run.started_at.format("%Y-%m-%d %H:%M").to_string()),
            run.features_completed,
            run.trigger.to_string(),
            run.decision.as_label(),
            run.critical_count,
            run.warning_count,
            run.info_count
        );
    }
    if let Some(manifest) = store.manifest()? {
        println!(
            "{}",
            out.dim(&format!(
                "{} run(s), {} pause(s)",
                manifest.run_count, manifest.pauses
            ))
        );
    }
    Ok(())
}

pub fn config(project: &Project) -> Result<()> {
    print!("{}", project.config().to_toml()?);
    Ok(())
}
