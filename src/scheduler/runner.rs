//! The dispatch loop.
//!
//! A single task owns dispatch. Project state sits behind one mutex, so
//! claims and every skip/block/resolve transition are serialized; workers
//! run as independent tasks in a `JoinSet` and report back through it.
//!
//! Drain is cooperative: when the control file exists nothing new is
//! claimed, in-flight workers run to completion, and the loop idles until
//! the file is removed.
//!
//! Other processes never write state during a run. Their mutations arrive
//! as control requests and are applied here, under the same lock.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::drain::DrainControl;
use super::requests::{ControlRequest, RequestQueue, RunMarker};
use super::worker::{WorkOutcome, WorkRequest, WorkerAgent, WorkerError, SKIP_MARKER};
use super::{ExitReason, RunSummary, SchedulerStatus};
use crate::blocker::{
    BlockerClassification, BlockerClassifier, BlockerType, BlockersDocument, EnvFile,
    HumanInterventionCoordinator, InterventionChoice, InterventionPrompt, InterventionRequest,
    InterventionResponse, ScriptedPrompt,
};
use crate::checkpoint::{
    build_checks, AutoFixGenerator, CheckContext, CheckpointDecision, CheckpointOrchestrator,
    CheckpointReport, CheckpointRun, CheckpointStore, CheckpointTrigger, QualityCheck,
    TriggerReason,
};
use crate::config::{AutopilotConfig, PathsConfig};
use crate::dependency::{rebuild_graph, DependencyDetector, SkipImpactAnalyzer, SkipRecommendation};
use crate::error::{AutopilotError, Result};
use crate::feature::FeatureId;
use crate::state::{ProjectState, StateStore};

type WorkerResult = (FeatureId, std::result::Result<WorkOutcome, WorkerError>);

/// Longest failure text kept in a blocker description.
const MAX_REASON_CHARS: usize = 500;

/// Requests a graceful stop from outside the dispatch loop (e.g. Ctrl-C).
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.sender.send_replace(true);
    }
}

pub struct WorkScheduler {
    project_root: PathBuf,
    config: Arc<AutopilotConfig>,
    state: Arc<Mutex<ProjectState>>,
    store: StateStore,
    drain: DrainControl,
    requests: RequestQueue,
    run_marker: RunMarker,
    worker: Arc<dyn WorkerAgent>,
    prompt: Arc<StdMutex<Box<dyn InterventionPrompt>>>,
    detector: DependencyDetector,
    analyzer: SkipImpactAnalyzer,
    coordinator: HumanInterventionCoordinator,
    trigger: CheckpointTrigger,
    orchestrator: CheckpointOrchestrator,
    checkpoint_store: CheckpointStore,
    autofix: AutoFixGenerator,
    shutdown: Arc<watch::Sender<bool>>,
}

impl WorkScheduler {
    /// Build a scheduler over already-loaded state.
    ///
    /// Interventions default to a [`ScriptedPrompt`] (every blocker deferred)
    /// until [`WorkScheduler::with_prompt`] installs another one.
    pub fn new(
        project_root: impl Into<PathBuf>,
        config: AutopilotConfig,
        state: ProjectState,
        worker: Arc<dyn WorkerAgent>,
    ) -> Self {
        let project_root = project_root.into();
        let resolve = |path: &Path| PathsConfig::resolve(&project_root, path);
        let coordinator = HumanInterventionCoordinator::new(
            EnvFile::new(resolve(&config.paths.env_file)),
            BlockersDocument::new(resolve(&config.paths.blockers_document)),
        );
        let orchestrator = CheckpointOrchestrator::new(
            config.checkpoint.check_timeout(),
            config.checkpoint.auto_pause_on_critical,
        )
        .with_checks(build_checks(&config.checkpoint));
        let (shutdown, _) = watch::channel(false);

        Self {
            store: StateStore::new(&project_root),
            drain: DrainControl::new(resolve(&config.paths.drain_file)),
            requests: RequestQueue::new(resolve(&config.paths.request_dir)),
            run_marker: RunMarker::new(resolve(&config.paths.run_marker)),
            checkpoint_store: CheckpointStore::new(resolve(&config.paths.checkpoint_dir)),
            detector: DependencyDetector::new(config.dependencies.clone()),
            analyzer: SkipImpactAnalyzer::new(
                config.impact.clone(),
                config.dependencies.min_confidence,
            ),
            trigger: CheckpointTrigger::new(&config.checkpoint),
            coordinator,
            orchestrator,
            autofix: AutoFixGenerator::new(),
            worker,
            prompt: Arc::new(StdMutex::new(Box::new(ScriptedPrompt::new()))),
            state: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
            project_root,
        }
    }

    /// Load state from the project's state store and build a scheduler.
    ///
    /// Claims left behind by a previous process are released here; plain
    /// loads keep them so read-only commands see what a live run is doing.
    pub fn open(
        project_root: impl Into<PathBuf>,
        config: AutopilotConfig,
        worker: Arc<dyn WorkerAgent>,
    ) -> Result<Self> {
        let project_root = project_root.into();
        let mut state = StateStore::new(&project_root).load()?;
        let released = state.release_stale_claims();
        if !released.is_empty() {
            info!(features = ?released, "released claims from a previous run");
        }
        Ok(Self::new(project_root, config, state, worker))
    }

    pub fn with_prompt(mut self, prompt: Box<dyn InterventionPrompt>) -> Self {
        self.prompt = Arc::new(StdMutex::new(prompt));
        self
    }

    /// Replace the configured quality checks.
    pub fn with_checks(mut self, checks: Vec<Arc<dyn QualityCheck>>) -> Self {
        self.orchestrator = CheckpointOrchestrator::new(
            self.config.checkpoint.check_timeout(),
            self.config.checkpoint.auto_pause_on_critical,
        )
        .with_checks(checks);
        self
    }

    pub fn state(&self) -> Arc<Mutex<ProjectState>> {
        Arc::clone(&self.state)
    }

    pub fn drain(&self) -> &DrainControl {
        &self.drain
    }

    pub fn requests(&self) -> &RequestQueue {
        &self.requests
    }

    pub fn run_marker(&self) -> &RunMarker {
        &self.run_marker
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: Arc::clone(&self.shutdown),
        }
    }

    fn max_concurrency(&self) -> usize {
        self.config.scheduler.max_concurrency.max(1)
    }

    fn min_confidence(&self) -> f64 {
        self.config.dependencies.min_confidence
    }

    fn persist(&self, state: &ProjectState) -> Result<()> {
        self.store.save(state)?;
        Ok(())
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        let state = self.state.lock().await;
        Ok(SchedulerStatus::collect(
            &state,
            &self.drain,
            self.max_concurrency(),
            self.min_confidence(),
        )?)
    }

    // ========================================================================
    // Dispatch loop
    // ========================================================================

    /// Dispatch until every feature passes, nothing more can run, or a
    /// shutdown is requested. Only resource-level failures (state store,
    /// drain file, checkpoint store) end the run with an error.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut shutdown = self.shutdown.subscribe();
        let mut join_set: JoinSet<WorkerResult> = JoinSet::new();
        let mut tasks: HashMap<TaskId, FeatureId> = HashMap::new();
        let max_concurrency = self.max_concurrency();
        let poll_interval = self.config.scheduler.poll_interval();
        let mut paused = false;
        let _marker = self.run_marker.acquire()?;

        {
            let mut state = self.state.lock().await;
            let changed = rebuild_graph(&mut state, &self.detector);
            if changed > 0 {
                self.persist(&state)?;
            }
            info!(
                features = state.features().len(),
                edges = state.graph.edge_count(),
                max_concurrency,
                "scheduler started"
            );
        }

        let exit_reason = loop {
            let stop = *shutdown.borrow();
            if stop {
                info!("shutdown requested, stopping dispatch");
                break ExitReason::Shutdown;
            }

            while let Some(joined) = join_set.try_join_next_with_id() {
                self.reap(joined, &mut tasks, &mut summary).await?;
            }
            summary.checkpoints += self.apply_requests().await?;

            let mut dispatched = 0;
            let mut drain_requested = self.drain.is_drain_requested()?;
            while !drain_requested && join_set.len() < max_concurrency {
                let Some(request) = self.claim_next().await? else {
                    break;
                };
                let worker = Arc::clone(&self.worker);
                let feature_id = request.feature_id;
                let handle = join_set.spawn(async move {
                    let result = AssertUnwindSafe(worker.execute(request))
                        .catch_unwind()
                        .await
                        .unwrap_or(Err(WorkerError::Panicked));
                    (feature_id, result)
                });
                tasks.insert(handle.id(), feature_id);
                dispatched += 1;
                drain_requested = self.drain.is_drain_requested()?;
            }

            if drain_requested != paused {
                paused = drain_requested;
                if paused {
                    info!(in_flight = join_set.len(), "drain requested, dispatch suspended");
                } else {
                    info!("drain cleared, dispatch resumed");
                }
            }

            if dispatched == 0 && join_set.is_empty() && !drain_requested {
                let counts = self.state.lock().await.counts();
                if counts.passing == counts.total {
                    info!(features = counts.total, "all features pass");
                    break ExitReason::Completed;
                }
                warn!(
                    remaining = counts.total - counts.passing,
                    blocked = counts.blocked,
                    "no eligible features left"
                );
                break ExitReason::Stalled;
            }

            if dispatched == 0 {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    Some(joined) = join_set.join_next_with_id() => {
                        self.reap(joined, &mut tasks, &mut summary).await?;
                    }
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        };

        if !join_set.is_empty() {
            info!(
                count = join_set.len(),
                "waiting for in-flight workers to complete"
            );
        }
        while let Some(joined) = join_set.join_next_with_id().await {
            self.reap(joined, &mut tasks, &mut summary).await?;
        }

        summary.exit_reason = exit_reason;
        info!(
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            blocked = summary.blocked,
            checkpoints = summary.checkpoints,
            exit_reason = %summary.exit_reason,
            "scheduler stopped"
        );
        Ok(summary)
    }

    /// Claim the head of the eligible list and build its work request.
    async fn claim_next(&self) -> Result<Option<WorkRequest>> {
        let mut state = self.state.lock().await;
        let Some(feature_id) = state.claim_next(self.min_confidence()) else {
            return Ok(None);
        };
        let instructions = build_instructions(&state, feature_id);
        self.persist(&state)?;
        info!(feature_id = %feature_id, "feature dispatched");
        Ok(Some(WorkRequest {
            feature_id,
            instructions,
        }))
    }

    async fn reap(
        &self,
        joined: std::result::Result<(TaskId, WorkerResult), JoinError>,
        tasks: &mut HashMap<TaskId, FeatureId>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let (feature_id, result) = match joined {
            Ok((task_id, completed)) => {
                tasks.remove(&task_id);
                completed
            }
            Err(err) => {
                let Some(feature_id) = tasks.remove(&err.id()) else {
                    error!(error = %err, "untracked worker task failed");
                    return Ok(());
                };
                error!(feature_id = %feature_id, error = %err, "worker task failed, releasing claim");
                let mut state = self.state.lock().await;
                state.release(feature_id);
                return self.persist(&state);
            }
        };
        match result {
            Ok(WorkOutcome::Passed) => self.handle_pass(feature_id, summary).await,
            Ok(WorkOutcome::Skipped(reason)) => self.handle_skip(feature_id, &reason, summary).await,
            Ok(WorkOutcome::Failed(reason)) => {
                self.handle_failure(feature_id, &reason, summary).await
            }
            Err(err) => self.handle_failure(feature_id, &err.to_string(), summary).await,
        }
    }

    // ========================================================================
    // Control requests
    // ========================================================================

    /// Apply requests queued by other processes. Returns the number of
    /// checkpoints run.
    async fn apply_requests(&self) -> Result<usize> {
        let requests = self.requests.take()?;
        if requests.is_empty() {
            return Ok(0);
        }

        let mut checkpoint_requested = false;
        {
            let mut state = self.state.lock().await;
            for request in requests {
                let kind = request.label();
                if matches!(request, ControlRequest::Checkpoint) {
                    checkpoint_requested = true;
                    continue;
                }
                match self.apply_request(&mut state, request) {
                    Ok(()) => info!(kind, "control request applied"),
                    Err(err) => warn!(kind, error = %err, "control request rejected"),
                }
            }
            self.persist(&state)?;
        }

        if checkpoint_requested {
            self.run_checkpoint(TriggerReason::Manual).await?;
            return Ok(1);
        }
        Ok(0)
    }

    fn apply_request(&self, state: &mut ProjectState, request: ControlRequest) -> Result<()> {
        match request {
            ControlRequest::Unblock { feature_id } => {
                self.coordinator.manual_unblock(state, feature_id)?;
            }
            ControlRequest::UnblockAll => {
                self.coordinator.unblock_all(state);
            }
            ControlRequest::ResolveAssumption {
                assumption_id,
                valid,
            } => {
                state
                    .resolve_assumption(assumption_id, valid)
                    .ok_or(AutopilotError::AssumptionNotFound(assumption_id))?;
            }
            ControlRequest::Import { features } => {
                let inserted = state.import(features);
                let edges = rebuild_graph(state, &self.detector);
                debug!(inserted = inserted.len(), edges, "features imported");
            }
            ControlRequest::AnalyzeDependencies => {
                let edges = rebuild_graph(state, &self.detector);
                debug!(edges, "dependencies re-detected");
            }
            ControlRequest::Checkpoint => {}
        }
        Ok(())
    }

    // ========================================================================
    // Completion handling
    // ========================================================================

    async fn handle_pass(&self, feature_id: FeatureId, summary: &mut RunSummary) -> Result<()> {
        let trigger = {
            let mut state = self.state.lock().await;
            let unlocked = state.mark_passed(feature_id, self.min_confidence());
            self.persist(&state)?;
            info!(
                feature_id = %feature_id,
                unlocked = unlocked.len(),
                completed = state.completed_count,
                "feature passed"
            );
            state
                .get(feature_id)
                .and_then(|f| self.trigger.evaluate(state.completed_count, &f.name))
        };
        summary.passed += 1;

        if let Some(reason) = trigger {
            self.run_checkpoint(reason).await?;
            summary.checkpoints += 1;
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        feature_id: FeatureId,
        reason: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let max_attempts = self.config.scheduler.max_attempts;
        let Some(feature) = state.get_mut(feature_id) else {
            return Ok(());
        };
        feature.in_progress = false;
        feature.attempts += 1;
        let attempts = feature.attempts;
        summary.failed += 1;

        if max_attempts > 0 && attempts >= max_attempts {
            let description = format!(
                "Failed {} attempt(s); last error: {}",
                attempts,
                truncate(reason, MAX_REASON_CHARS)
            );
            state.add_blocker(
                feature_id,
                &BlockerClassification::of(BlockerType::TechPrerequisite),
                description,
            );
            summary.blocked += 1;
            self.coordinator.refresh_document(&state);
            warn!(feature_id = %feature_id, attempts, "feature parked after repeated failures");
        } else {
            warn!(feature_id = %feature_id, attempts, reason = %truncate(reason, 200), "feature failed");
        }
        self.persist(&state)
    }

    async fn handle_skip(
        &self,
        feature_id: FeatureId,
        reason: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let classification = BlockerClassifier::shared().classify(reason);
        let mut state = self.state.lock().await;
        let Some(feature) = state.get_mut(feature_id) else {
            return Ok(());
        };
        feature.in_progress = false;
        feature.was_skipped = true;
        feature.skip_count += 1;
        feature.skip_reason = Some(reason.to_string());
        let skip_count = feature.skip_count;
        let name = feature.name.clone();
        summary.skipped += 1;

        let impact = self.analyzer.analyze(&state.graph, feature_id);
        info!(
            feature_id = %feature_id,
            blocker_type = %classification.blocker_type,
            dependents = impact.total_impact,
            recommendation = %impact.recommendation,
            "feature skipped"
        );

        match impact.recommendation {
            SkipRecommendation::CascadeSkip => {
                self.analyzer.cascade_skip(&mut state, feature_id);
            }
            SkipRecommendation::ImplementWithMocks => {
                for &dependent in &impact.immediate_dependents {
                    let needs_assumption = state.get(dependent).is_some_and(|f| {
                        !f.passes && !f.mocked_dependencies.contains(&feature_id)
                    });
                    if needs_assumption {
                        state.add_assumption(
                            dependent,
                            Some(feature_id),
                            format!(
                                "Implemented against a placeholder for #{} {} (skipped: {})",
                                feature_id, name, reason
                            ),
                        );
                        debug!(feature_id = %dependent, about = %feature_id, "assumption recorded");
                    }
                }
            }
            SkipRecommendation::ReviewDependencies => {
                warn!(
                    feature_id = %feature_id,
                    dependents = ?impact.all_dependents,
                    "dependents need review"
                );
            }
            SkipRecommendation::SafeToSkip => {}
        }

        if classification.requires_human_intervention {
            let Some(blocker_id) = state.add_blocker(feature_id, &classification, reason) else {
                return self.persist(&state);
            };
            summary.blocked += 1;
            self.coordinator.refresh_document(&state);
            self.persist(&state)?;
            let request = self.coordinator.request(&state, blocker_id, Some(impact))?;
            drop(state);
            return self.intervene(request).await;
        }

        if skip_count > self.config.scheduler.max_skip_retries {
            state.add_blocker(
                feature_id,
                &classification,
                format!("Skipped {} times: {}", skip_count, reason),
            );
            summary.blocked += 1;
            self.coordinator.refresh_document(&state);
            warn!(feature_id = %feature_id, skip_count, "feature parked after repeated skips");
        } else {
            state.move_to_back(feature_id);
        }
        self.persist(&state)
    }

    /// Ask for a decision without holding the state lock, then apply it.
    async fn intervene(&self, request: InterventionRequest) -> Result<()> {
        let blocker_id = request.blocker_id;
        let prompt = Arc::clone(&self.prompt);
        let coordinator = self.coordinator.clone();
        let collected = tokio::task::spawn_blocking(move || {
            let mut prompt = match prompt.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            coordinator.collect(&mut **prompt, &request)
        })
        .await;

        let response = match collected {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(blocker_id, error = %err, "intervention prompt failed, deferring");
                deferred(blocker_id)
            }
            Err(err) => {
                warn!(blocker_id, error = %err, "intervention prompt task failed, deferring");
                deferred(blocker_id)
            }
        };

        let mut state = self.state.lock().await;
        match self.coordinator.apply(&mut state, &response) {
            Ok(outcome) => info!(
                blocker_id,
                choice = %response.choice,
                outcome = ?outcome,
                "intervention applied"
            ),
            Err(err) => warn!(blocker_id, error = %err, "intervention could not be applied"),
        }
        self.persist(&state)
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Run the checkpoint gate: checks, report, run record, auto-fix, and a
    /// drain request when the decision is PAUSE.
    pub async fn run_checkpoint(&self, trigger: TriggerReason) -> Result<CheckpointRun> {
        let ctx = {
            let mut state = self.state.lock().await;
            state.checkpoint_sequence += 1;
            self.persist(&state)?;
            CheckContext {
                project_root: self.project_root.clone(),
                sequence: state.checkpoint_sequence,
                features_completed: state.completed_count,
            }
        };

        let run = self.orchestrator.run(ctx, trigger).await;

        match CheckpointReport::write(self.checkpoint_store.dir(), &run) {
            Ok(path) => info!(path = %path.display(), "checkpoint report written"),
            Err(err) => warn!(sequence = run.sequence, error = %err, "failed to write checkpoint report"),
        }
        self.checkpoint_store.append(&run)?;

        {
            let mut state = self.state.lock().await;
            self.autofix.apply(&mut state, &run);
            self.persist(&state)?;
        }

        if run.decision == CheckpointDecision::Pause {
            self.drain.request_pause(&format!(
                "checkpoint {} paused: {} critical issue(s)",
                run.sequence, run.critical_count
            ))?;
            warn!(
                sequence = run.sequence,
                critical = run.critical_count,
                "checkpoint paused the run; resume once fixes are reviewed"
            );
        }
        Ok(run)
    }
}

fn deferred(blocker_id: u64) -> InterventionResponse {
    InterventionResponse {
        blocker_id,
        choice: InterventionChoice::Defer,
        values: Vec::new(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Instructions handed to the agent for one feature.
fn build_instructions(state: &ProjectState, feature_id: FeatureId) -> String {
    let Some(feature) = state.get(feature_id) else {
        return String::new();
    };
    let mut text = format!("Implement feature #{}: {}\n", feature.id, feature.name);
    if !feature.description.is_empty() {
        text.push_str(&format!("\n{}\n", feature.description));
    }
    if !feature.mocked_dependencies.is_empty() {
        text.push_str(
            "\nThese dependencies are not implemented yet. Use placeholders and document every assumption you make about them:\n",
        );
        for dependency in &feature.mocked_dependencies {
            let name = state
                .get(*dependency)
                .map(|f| f.name.as_str())
                .unwrap_or("unknown feature");
            text.push_str(&format!("- #{} {}\n", dependency, name));
        }
    }
    if feature.passing_with_mocks && feature.mocked_dependencies.is_empty() {
        text.push_str("\nUse placeholders for unavailable configuration or services and document them.\n");
    }
    text.push_str(&format!(
        "\nIf you cannot proceed, print a line `{} <reason>` and stop.\n",
        SKIP_MARKER
    ));
    text
}
