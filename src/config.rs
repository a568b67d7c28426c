//! Configuration for the autopilot control plane.
//!
//! A single [`AutopilotConfig`] is built once at startup and handed to each
//! component. Values come from serde defaults, an optional
//! `.ralph/autopilot.toml`, and `AUTOPILOT__SECTION__KEY` environment
//! overrides, in that order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "AUTOPILOT";

/// Directory holding autopilot state, relative to the project root.
pub const STATE_DIR_NAME: &str = ".ralph";

/// Configuration file name inside [`STATE_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "autopilot.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub scheduler: SchedulerConfig,
    pub dependencies: DependencyPolicy,
    pub impact: ImpactPolicy,
    pub checkpoint: CheckpointConfig,
    pub paths: PathsConfig,
}

impl AutopilotConfig {
    /// Load configuration for the project rooted at `project_root`.
    pub fn load(project_root: &Path) -> Result<Self, config::ConfigError> {
        let file = project_root.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME);
        config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("checkpoint.enabled_checks")
                    .with_list_parse_key("checkpoint.milestone_keywords")
                    .with_list_parse_key("scheduler.agent_args")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Work scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrent workers.
    /// Default: 3
    pub max_concurrency: usize,
    /// How often the drain file and idle queue are polled, in milliseconds.
    /// Default: 500
    pub poll_interval_ms: u64,
    /// Upper bound on a single worker invocation, in seconds.
    /// Default: 1800 (30 minutes)
    pub worker_timeout_secs: u64,
    /// Failed attempts before a feature is parked behind a blocker.
    /// Default: 3
    pub max_attempts: u32,
    /// Non-human skips before a feature is parked behind a blocker.
    /// Default: 2
    pub max_skip_retries: u32,
    /// Whether skips needing a human prompt on the terminal.
    /// Default: true
    pub interactive: bool,
    /// External coding agent command.
    /// Default: "claude"
    pub agent_command: String,
    /// Arguments passed before the feature id.
    pub agent_args: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            poll_interval_ms: 500,
            worker_timeout_secs: 1800,
            max_attempts: 3,
            max_skip_retries: 2,
            interactive: true,
            agent_command: "claude".to_string(),
            agent_args: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Sets the maximum concurrency (clamped to at least one worker).
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Dependency detection policy constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyPolicy {
    /// Confidence for explicit `#id` references.
    /// Default: 0.95
    pub explicit_confidence: f64,
    /// Confidence for keyword + name/category co-occurrence.
    /// Default: 0.75
    pub keyword_confidence: f64,
    /// Confidence for category prerequisite relationships.
    /// Default: 0.65
    pub category_confidence: f64,
    /// Edges below this confidence are ignored for eligibility.
    /// Default: 0.6
    pub min_confidence: f64,
    /// Phrases that signal a dependency.
    pub keywords: Vec<String>,
    /// Category -> prerequisite categories.
    pub category_prerequisites: BTreeMap<String, Vec<String>>,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        let keywords = [
            "requires",
            "depends on",
            "dependent on",
            "after",
            "once",
            "needs",
            "builds on",
            "prerequisite",
            "based on",
            "extends",
            "uses",
        ];
        let table: [(&str, &[&str]); 8] = [
            ("authorization", &["authentication"]),
            ("profile", &["authentication"]),
            ("admin", &["authentication", "authorization"]),
            ("payments", &["authentication"]),
            ("billing", &["payments"]),
            ("notifications", &["users"]),
            ("reporting", &["data"]),
            ("search", &["data"]),
        ];
        Self {
            explicit_confidence: 0.95,
            keyword_confidence: 0.75,
            category_confidence: 0.65,
            min_confidence: 0.6,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category_prerequisites: table
                .iter()
                .map(|(category, prereqs)| {
                    (
                        category.to_string(),
                        prereqs.iter().map(|p| p.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// Skip impact thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactPolicy {
    /// Immediate dependents at or above which a skip cascades.
    /// Default: 5
    pub cascade_immediate: usize,
    /// Total impact at or above which a skip cascades.
    /// Default: 10
    pub cascade_total: usize,
    /// Total impact at or below which dependents proceed with mocks.
    /// Default: 3
    pub mocks_max_total: usize,
    /// Breadth-first depth bound for the impact walk.
    /// Default: 3
    pub max_depth: usize,
}

impl Default for ImpactPolicy {
    fn default() -> Self {
        Self {
            cascade_immediate: 5,
            cascade_total: 10,
            mocks_max_total: 3,
            max_depth: 3,
        }
    }
}

/// Checkpoint gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Run a checkpoint every N completed features (0 disables).
    /// Default: 10
    pub frequency: u32,
    /// Keywords that trigger a milestone checkpoint when they appear in
    /// the name of a just-completed feature.
    pub milestone_keywords: Vec<String>,
    /// Whether critical issues pause the run.
    /// Default: true
    pub auto_pause_on_critical: bool,
    /// Per-check wait bound, in seconds.
    /// Default: 120
    pub check_timeout_secs: u64,
    /// Names of the checks to run.
    pub enabled_checks: Vec<String>,
    /// Source directories scanned for bundle size (relative to the project root).
    pub bundle_dirs: Vec<String>,
    /// Bundle size above which a warning is raised, in KiB.
    /// Default: 512
    pub bundle_warn_kib: u64,
    /// Source files longer than this many lines are reported as smells.
    /// Default: 500
    pub max_file_lines: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            frequency: 10,
            milestone_keywords: vec![
                "authentication".to_string(),
                "payment".to_string(),
                "release".to_string(),
            ],
            auto_pause_on_critical: true,
            check_timeout_secs: 120,
            enabled_checks: vec![
                "code_smells".to_string(),
                "secrets".to_string(),
                "bundle_size".to_string(),
            ],
            bundle_dirs: vec!["dist".to_string(), "build".to_string()],
            bundle_warn_kib: 512,
            max_file_lines: 500,
        }
    }
}

impl CheckpointConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// Filesystem locations, relative to the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Drain control file. Its presence requests a pause.
    pub drain_file: PathBuf,
    /// Pending control requests for a running scheduler.
    pub request_dir: PathBuf,
    /// Present while a scheduler run is active.
    pub run_marker: PathBuf,
    /// Human-readable blockers document.
    pub blockers_document: PathBuf,
    /// Environment file receiving provided values.
    pub env_file: PathBuf,
    /// Checkpoint reports and run metadata.
    pub checkpoint_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            drain_file: PathBuf::from(".control/pause_drain"),
            request_dir: PathBuf::from(".control/requests"),
            run_marker: PathBuf::from(".control/running"),
            blockers_document: PathBuf::from("BLOCKERS.md"),
            env_file: PathBuf::from(".env"),
            checkpoint_dir: PathBuf::from(".ralph/checkpoints"),
        }
    }
}

impl PathsConfig {
    /// Resolve a configured path against the project root.
    pub fn resolve(project_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        }
    }
}
