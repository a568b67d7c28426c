//! End-to-end scheduler runs against a scripted agent.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ralph_autopilot::blocker::{AssumptionStatus, BlockerType};
use ralph_autopilot::config::AutopilotConfig;
use ralph_autopilot::dependency::{DetectionMethod, SkipImpactAnalyzer, SkipRecommendation};
use ralph_autopilot::feature::{FeatureId, FeatureSpec};
use ralph_autopilot::scheduler::{
    ExitReason, WorkOutcome, WorkRequest, WorkScheduler, WorkerAgent, WorkerError,
};
use ralph_autopilot::state::{ProjectState, StateStore};

/// Replays queued outcomes per feature and passes everything else.
#[derive(Default)]
struct ScriptedAgent {
    outcomes: Mutex<HashMap<FeatureId, VecDeque<WorkOutcome>>>,
    dispatched: Mutex<Vec<FeatureId>>,
}

impl ScriptedAgent {
    fn skip(self, id: u64, reason: &str) -> Self {
        self.outcomes
            .lock()
            .expect("outcomes")
            .entry(FeatureId(id))
            .or_default()
            .push_back(WorkOutcome::Skipped(reason.to_string()));
        self
    }

    fn dispatched(&self) -> Vec<FeatureId> {
        self.dispatched.lock().expect("dispatched").clone()
    }
}

#[async_trait]
impl WorkerAgent for ScriptedAgent {
    async fn execute(&self, request: WorkRequest) -> Result<WorkOutcome, WorkerError> {
        self.dispatched
            .lock()
            .expect("dispatched")
            .push(request.feature_id);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let next = self
            .outcomes
            .lock()
            .expect("outcomes")
            .get_mut(&request.feature_id)
            .and_then(|queue| queue.pop_front());
        Ok(next.unwrap_or(WorkOutcome::Passed))
    }
}

fn test_config() -> AutopilotConfig {
    let mut config = AutopilotConfig::default();
    config.scheduler = config
        .scheduler
        .with_max_concurrency(2)
        .with_poll_interval_ms(10)
        .with_interactive(false);
    config.checkpoint.frequency = 0;
    config.checkpoint.milestone_keywords.clear();
    config.checkpoint.enabled_checks.clear();
    config
}

fn spec(id: u64, name: &str, description: &str, priority: f64) -> FeatureSpec {
    FeatureSpec {
        id,
        name: name.to_string(),
        description: description.to_string(),
        category: None,
        priority: Some(priority),
        passes: false,
    }
}

fn oauth_project() -> ProjectState {
    let mut state = ProjectState::new();
    state.import(vec![
        spec(5, "OAuth login", "Sign in with an external identity provider", 1.0),
        spec(12, "Profile page", "after OAuth (#5) is implemented", 2.0),
        spec(14, "Session settings", "Builds on feature 5 tokens", 3.0),
        spec(20, "Footer links", "Static links in the page footer", 4.0),
    ]);
    state
}

#[tokio::test]
async fn test_stripe_skip_lets_dependents_proceed_with_mocks() {
    let temp_dir = TempDir::new().expect("temp dir");
    let agent = Arc::new(ScriptedAgent::default().skip(5, "need Stripe account and API key"));
    let scheduler = WorkScheduler::new(
        temp_dir.path(),
        test_config(),
        oauth_project(),
        Arc::clone(&agent) as Arc<dyn WorkerAgent>,
    )
    .with_checks(Vec::new());

    let summary = scheduler.run().await.expect("run");
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.exit_reason, ExitReason::Stalled);
    assert_eq!(agent.dispatched()[0], FeatureId(5));

    let state = StateStore::new(temp_dir.path()).load().expect("load");

    let edge = state
        .graph
        .edge(FeatureId(12), FeatureId(5))
        .expect("profile depends on oauth");
    assert_eq!(edge.detected_method, DetectionMethod::ExplicitId);
    assert_eq!(edge.confidence, 0.95);

    let oauth = state.get(FeatureId(5)).expect("feature");
    assert!(oauth.is_blocked);
    assert!(oauth.was_skipped);
    assert_eq!(oauth.blocker_type, Some(BlockerType::ExternalService));

    for id in [12, 14] {
        let feature = state.get(FeatureId(id)).expect("feature");
        assert!(feature.passes);
        assert!(feature.passing_with_mocks);
        assert!(feature.mocked_dependencies.contains(&FeatureId(5)));
    }
    assert_eq!(state.assumptions().len(), 2);

    let document = fs::read_to_string(temp_dir.path().join("BLOCKERS.md")).expect("document");
    assert!(document.contains("EXTERNAL_SERVICE"));
    assert!(document.contains("autopilot unblock 5"));
}

#[test]
fn test_oauth_skip_impact_recommends_mocks() {
    let config = AutopilotConfig::default();
    let mut state = oauth_project();
    let detector = ralph_autopilot::dependency::DependencyDetector::new(config.dependencies.clone());
    ralph_autopilot::dependency::rebuild_graph(&mut state, &detector);

    let analyzer = SkipImpactAnalyzer::new(config.impact.clone(), config.dependencies.min_confidence);
    let impact = analyzer.analyze(&state.graph, FeatureId(5));
    assert_eq!(impact.immediate_dependents, vec![FeatureId(12), FeatureId(14)]);
    assert_eq!(impact.total_impact, 2);
    assert_eq!(impact.recommendation, SkipRecommendation::ImplementWithMocks);
}

#[tokio::test]
async fn test_manual_unblock_then_rerun_completes_and_flags_assumptions() {
    let temp_dir = TempDir::new().expect("temp dir");
    let agent = Arc::new(ScriptedAgent::default().skip(5, "need Stripe account and API key"));
    let first = WorkScheduler::new(
        temp_dir.path(),
        test_config(),
        oauth_project(),
        agent as Arc<dyn WorkerAgent>,
    )
    .with_checks(Vec::new());
    first.run().await.expect("first run");

    let store = StateStore::new(temp_dir.path());
    let mut state = store.load().expect("load");
    let coordinator = ralph_autopilot::blocker::HumanInterventionCoordinator::new(
        ralph_autopilot::blocker::EnvFile::new(temp_dir.path().join(".env")),
        ralph_autopilot::blocker::BlockersDocument::new(temp_dir.path().join("BLOCKERS.md")),
    );
    coordinator
        .manual_unblock(&mut state, FeatureId(5))
        .expect("unblock");
    assert!(!state.get(FeatureId(5)).expect("feature").is_blocked);
    store.save(&state).expect("save");

    let second = WorkScheduler::open(
        temp_dir.path(),
        test_config(),
        Arc::new(ScriptedAgent::default()) as Arc<dyn WorkerAgent>,
    )
    .expect("open")
    .with_checks(Vec::new());
    let summary = second.run().await.expect("second run");
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.exit_reason, ExitReason::Completed);

    let state = StateStore::new(temp_dir.path()).load().expect("load");
    assert!(state.features().iter().all(|f| f.passes));
    assert!(state
        .assumptions()
        .iter()
        .all(|a| a.status == AssumptionStatus::NeedsReview));
}

#[tokio::test]
async fn test_no_claims_while_drain_file_exists() {
    let temp_dir = TempDir::new().expect("temp dir");
    let agent = Arc::new(ScriptedAgent::default());
    let scheduler = Arc::new(
        WorkScheduler::new(
            temp_dir.path(),
            test_config(),
            oauth_project(),
            Arc::clone(&agent) as Arc<dyn WorkerAgent>,
        )
        .with_checks(Vec::new()),
    );
    scheduler.drain().request_pause("integration").expect("pause");
    assert!(temp_dir.path().join(".control/pause_drain").exists());

    let running = Arc::clone(&scheduler);
    let handle = tokio::spawn(async move { running.run().await });

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = scheduler.status().await.expect("status");
        assert!(status.drain_requested);
        assert!(status.in_flight.is_empty());
    }
    assert!(agent.dispatched().is_empty());

    scheduler.drain().resume().expect("resume");
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("finished in time")
        .expect("join")
        .expect("run");
    assert_eq!(summary.passed, 4);
    assert_eq!(summary.exit_reason, ExitReason::Completed);
}
