//! CLI tests against the `autopilot` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

use ralph_autopilot::blocker::{BlockerClassification, BlockerType};
use ralph_autopilot::feature::{Feature, FeatureId};
use ralph_autopilot::scheduler::{ControlRequest, RequestQueue, RunMarker};
use ralph_autopilot::state::{ProjectState, StateStore};

const FEATURES: &str = r#"[
    {"id": 5, "name": "OAuth login", "description": "Sign in with an external identity provider", "priority": 1},
    {"id": 12, "name": "Profile page", "description": "after OAuth (#5) is implemented", "priority": 2},
    {"id": 20, "name": "Footer links", "description": "Static links in the page footer"}
]"#;

/// Get a Command instance for the autopilot binary, rooted at `dir`.
#[allow(deprecated)]
fn autopilot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("autopilot").expect("Failed to find autopilot binary");
    cmd.arg("--project").arg(dir.path()).env("NO_COLOR", "1");
    cmd
}

fn import_features(dir: &TempDir) {
    let file = dir.path().join("features.json");
    fs::write(&file, FEATURES).expect("write features");
    autopilot(dir)
        .arg("import")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 new"));
}

#[test]
fn test_import_detects_dependencies() {
    let temp_dir = TempDir::new().expect("temp dir");
    import_features(&temp_dir);

    let state = StateStore::new(temp_dir.path()).load().expect("load");
    assert_eq!(state.features().len(), 3);
    assert_eq!(state.get(FeatureId(20)).expect("feature").priority, 3.0);

    autopilot(&temp_dir)
        .args(["show-dependencies", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#5 OAuth login"))
        .stdout(predicate::str::contains("0.95"))
        .stdout(predicate::str::contains("explicit_id"));

    autopilot(&temp_dir)
        .args(["show-dependencies", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Required by:"))
        .stdout(predicate::str::contains("#12 Profile page"));
}

#[test]
fn test_unknown_targets_exit_with_one() {
    let temp_dir = TempDir::new().expect("temp dir");
    import_features(&temp_dir);
    let before = fs::read_to_string(temp_dir.path().join(".ralph/state.json")).expect("state");

    autopilot(&temp_dir)
        .args(["unblock", "42"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("feature #42 not found"));

    autopilot(&temp_dir)
        .args(["show-dependencies", "99"])
        .assert()
        .code(1);

    autopilot(&temp_dir)
        .args(["resolve-assumption", "7", "--valid"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("assumption 7 not found"));

    let after = fs::read_to_string(temp_dir.path().join(".ralph/state.json")).expect("state");
    assert_eq!(before, after);
}

#[test]
fn test_pause_and_resume_toggle_drain_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let drain_file = temp_dir.path().join(".control/pause_drain");

    autopilot(&temp_dir).arg("pause").assert().success();
    assert!(drain_file.exists());

    autopilot(&temp_dir)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"drain_requested\": true"));

    autopilot(&temp_dir).arg("resume").assert().success();
    assert!(!drain_file.exists());

    autopilot(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dispatch: running"));
}

#[test]
fn test_unblock_clears_blocker_and_moves_to_front() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut state = ProjectState::with_features(vec![
        Feature::new(1, "Footer links", 1.0),
        Feature::new(5, "Checkout", 4.0),
    ]);
    state.add_blocker(
        FeatureId(5),
        &BlockerClassification::of(BlockerType::ExternalService),
        "need Stripe account and API key",
    );
    StateStore::new(temp_dir.path()).save(&state).expect("save");

    autopilot(&temp_dir)
        .args(["show-blockers", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EXTERNAL_SERVICE"))
        .stdout(predicate::str::contains("need Stripe account and API key"));

    autopilot(&temp_dir)
        .args(["unblock", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 blocker(s) resolved"));

    let state = StateStore::new(temp_dir.path()).load().expect("load");
    let feature = state.get(FeatureId(5)).expect("feature");
    assert!(!feature.is_blocked);
    assert!(feature.priority < 1.0);

    autopilot(&temp_dir)
        .arg("show-blockers")
        .assert()
        .success()
        .stdout(predicate::str::contains("No features are currently blocked."));
}

#[test]
fn test_invalid_assumption_reopens_feature() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut state = ProjectState::with_features(vec![
        Feature::new(5, "Payments", 1.0),
        Feature::new(12, "Invoices", 2.0).passing(),
    ]);
    let id = state.add_assumption(FeatureId(12), Some(FeatureId(5)), "prices are in cents");
    StateStore::new(temp_dir.path()).save(&state).expect("save");

    autopilot(&temp_dir)
        .arg("assumptions")
        .assert()
        .success()
        .stdout(predicate::str::contains("prices are in cents"));

    autopilot(&temp_dir)
        .args(["resolve-assumption", &id.to_string(), "--invalid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INVALID"));

    let state = StateStore::new(temp_dir.path()).load().expect("load");
    assert!(!state.get(FeatureId(12)).expect("feature").passes);
}

#[test]
fn test_config_and_empty_checkpoints() {
    let temp_dir = TempDir::new().expect("temp dir");

    autopilot(&temp_dir)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[scheduler]"))
        .stdout(predicate::str::contains("max_concurrency = 3"));

    autopilot(&temp_dir)
        .arg("checkpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints recorded."));
}

#[test]
fn test_mutations_queue_while_a_run_is_active() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut state = ProjectState::with_features(vec![
        Feature::new(1, "Footer links", 1.0),
        Feature::new(5, "Checkout", 4.0),
    ]);
    state.add_blocker(
        FeatureId(5),
        &BlockerClassification::of(BlockerType::ExternalService),
        "need Stripe account and API key",
    );
    StateStore::new(temp_dir.path()).save(&state).expect("save");
    let marker = RunMarker::new(temp_dir.path().join(".control/running"));
    let guard = marker.acquire().expect("marker");
    let before = fs::read_to_string(temp_dir.path().join(".ralph/state.json")).expect("state");

    autopilot(&temp_dir)
        .args(["unblock", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("queued: unblock request"));

    autopilot(&temp_dir)
        .args(["unblock", "42"])
        .assert()
        .code(1);

    let after = fs::read_to_string(temp_dir.path().join(".ralph/state.json")).expect("state");
    assert_eq!(before, after);

    let requests = RequestQueue::new(temp_dir.path().join(".control/requests"))
        .take()
        .expect("requests");
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        requests[0],
        ControlRequest::Unblock {
            feature_id: FeatureId(5)
        }
    ));
    drop(guard);
}

#[test]
fn test_status_shows_claims_only_while_running() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut state = ProjectState::with_features(vec![
        Feature::new(1, "Footer links", 1.0),
        Feature::new(2, "Checkout", 2.0),
    ]);
    state.try_claim(FeatureId(1), 0.6);
    StateStore::new(temp_dir.path()).save(&state).expect("save");

    autopilot(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 in progress"))
        .stdout(predicate::str::contains("no run active"));

    let marker = RunMarker::new(temp_dir.path().join(".control/running"));
    let guard = marker.acquire().expect("marker");
    autopilot(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 in progress"))
        .stdout(predicate::str::contains("Workers: 1/3"));
    drop(guard);

    let saved = StateStore::new(temp_dir.path()).load().expect("load");
    assert_eq!(saved.in_flight(), vec![FeatureId(1)]);
}

#[test]
fn test_unblock_requires_target() {
    let temp_dir = TempDir::new().expect("temp dir");
    autopilot(&temp_dir).arg("unblock").assert().failure();
}
