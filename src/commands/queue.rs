//! Queue commands: run, pause, resume, status, import, analyze-dependencies.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use ralph_autopilot::blocker::TerminalPrompt;
use ralph_autopilot::dependency::{rebuild_graph, DependencyDetector};
use ralph_autopilot::feature::FeatureSpec;
use ralph_autopilot::scheduler::{
    CommandWorker, ControlRequest, ExitReason, SchedulerStatus, WorkScheduler,
};
use ralph_autopilot::Result;

use super::{Output, Project};

pub async fn run(
    project: &Project,
    out: &Output,
    max_concurrency: Option<usize>,
    agent: Option<String>,
    non_interactive: bool,
) -> Result<()> {
    let mut config = project.config().clone();
    if let Some(max_concurrency) = max_concurrency {
        config.scheduler = config.scheduler.with_max_concurrency(max_concurrency);
    }
    if let Some(agent) = agent {
        config.scheduler.agent_command = agent;
    }
    if non_interactive {
        config.scheduler = config.scheduler.with_interactive(false);
    }

    let worker = CommandWorker::new(&config.scheduler.agent_command, project.root())
        .with_args(config.scheduler.agent_args.clone())
        .with_timeout(config.scheduler.worker_timeout());
    let attended = config.scheduler.interactive && console::user_attended_stderr();

    let mut scheduler = WorkScheduler::open(project.root(), config, Arc::new(worker))?;
    if attended {
        scheduler = scheduler.with_prompt(Box::new(TerminalPrompt::new()));
    }

    let shutdown = scheduler.shutdown_handle();
    let drain = scheduler.drain().clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if let Err(err) = drain.request_pause("interrupted") {
            warn!(error = %err, "failed to write drain file on interrupt");
        }
        shutdown.request();
    }) {
        warn!(error = %err, "failed to install Ctrl-C handler");
    }

    if scheduler.drain().is_drain_requested()? {
        println!(
            "{} dispatch is paused; run `autopilot resume` to continue",
            out.warn("paused:")
        );
    }

    let summary = scheduler.run().await?;

    let reason = summary.exit_reason.to_string();
    let reason = match summary.exit_reason {
        ExitReason::Completed => out.success(&reason),
        ExitReason::Stalled | ExitReason::Shutdown => out.warn(&reason),
    };
    println!("{} {}", out.header("Run finished:"), reason);
    println!(
        "  passed {}  failed {}  skipped {}  blocked {}  checkpoints {}",
        summary.passed, summary.failed, summary.skipped, summary.blocked, summary.checkpoints
    );
    if summary.exit_reason == ExitReason::Stalled {
        println!(
            "  {}",
            out.dim("see `autopilot show-blockers` for what needs a human")
        );
    }
    Ok(())
}

pub fn pause(project: &Project, out: &Output, reason: &str) -> Result<()> {
    let drain = project.drain();
    drain.request_pause(reason)?;
    println!(
        "{} drain requested ({})",
        out.success("paused:"),
        drain.path().display()
    );
    Ok(())
}

pub fn resume(project: &Project, out: &Output) -> Result<()> {
    project.drain().resume()?;
    println!("{} dispatch may continue", out.success("resumed:"));
    Ok(())
}

pub fn status(project: &Project, out: &Output, json: bool) -> Result<()> {
    let mut state = project.load()?;
    let running = project.is_running()?;
    if !running {
        // Claims on disk belong to a run that has ended.
        state.release_stale_claims();
    }
    let status = SchedulerStatus::collect(
        &state,
        &project.drain(),
        project.config().scheduler.max_concurrency,
        project.min_confidence(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let drain = if status.drain_requested {
        out.warn("paused")
    } else {
        out.success("running")
    };
    println!("{} {}", out.header("Dispatch:"), drain);
    if !running {
        println!("  {}", out.dim("no run active"));
    }
    if let Some(reason) = &status.drain_reason {
        println!("  {}", out.dim(reason));
    }

    let counts = &status.counts;
    println!(
        "{} {}/{} passing, {} in progress, {} blocked, {} skipped, {} with mocks",
        out.header("Features:"),
        counts.passing,
        counts.total,
        counts.in_progress,
        counts.blocked,
        counts.skipped,
        counts.with_mocks
    );
    println!(
        "{} {}/{}",
        out.header("Workers:"),
        status.in_flight.len(),
        status.max_concurrency
    );

    if status.next_eligible.is_empty() {
        println!("{} none", out.header("Next:"));
    } else {
        println!("{}", out.header("Next:"));
        for id in &status.next_eligible {
            if let Some(feature) = state.get(*id) {
                println!(
                    "  #{} {} {}",
                    feature.id,
                    feature.name,
                    out.dim(&format!("(priority {})", feature.priority))
                );
            }
        }
    }
    Ok(())
}

pub fn import(project: &Project, out: &Output, file: &Path) -> Result<()> {
    let content = fs::read_to_string(file)?;
    let specs: Vec<FeatureSpec> = serde_json::from_str(&content)?;
    let received = specs.len();
    if project.submit_if_running(out, ControlRequest::Import { features: specs.clone() })? {
        return Ok(());
    }

    let mut state = project.load()?;
    let inserted = state.import(specs);
    let detector = DependencyDetector::new(project.config().dependencies.clone());
    let edges = rebuild_graph(&mut state, &detector);
    project.save(&state)?;

    println!(
        "{} {} new, {} updated, {} total; {} dependency edge(s) added",
        out.success("imported:"),
        inserted.len(),
        received - inserted.len(),
        state.features().len(),
        edges
    );
    Ok(())
}

pub fn analyze_dependencies(project: &Project, out: &Output) -> Result<()> {
    if project.submit_if_running(out, ControlRequest::AnalyzeDependencies)? {
        return Ok(());
    }
    let mut state = project.load()?;
    let detector = DependencyDetector::new(project.config().dependencies.clone());
    let changed = rebuild_graph(&mut state, &detector);
    project.save(&state)?;

    println!(
        "{} {} edge(s), {} added or raised",
        out.header("Dependencies:"),
        state.graph.edge_count(),
        changed
    );
    for edge in state.graph.edges() {
        println!(
            "  #{} -> #{}  {} {:.2} {}",
            edge.feature,
            edge.depends_on,
            edge.confidence_indicator(),
            edge.confidence,
            out.dim(&edge.detected_method.to_string())
        );
    }
    Ok(())
}
