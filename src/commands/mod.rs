//! Command handlers for the `autopilot` binary.

pub mod blockers;
pub mod checkpoints;
pub mod queue;

use std::path::{Path, PathBuf};

use console::Term;
use owo_colors::OwoColorize;

use ralph_autopilot::blocker::{BlockersDocument, EnvFile, HumanInterventionCoordinator};
use ralph_autopilot::checkpoint::CheckpointStore;
use ralph_autopilot::config::{AutopilotConfig, PathsConfig};
use ralph_autopilot::scheduler::{ControlRequest, DrainControl, RequestQueue, RunMarker};
use ralph_autopilot::state::{ProjectState, StateStore};
use ralph_autopilot::Result;

/// A project root with its configuration and state store.
pub struct Project {
    root: PathBuf,
    config: AutopilotConfig,
    store: StateStore,
}

impl Project {
    pub fn open(root: &Path) -> Result<Self> {
        let config = AutopilotConfig::load(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store: StateStore::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.dependencies.min_confidence
    }

    pub fn load(&self) -> Result<ProjectState> {
        Ok(self.store.load()?)
    }

    pub fn save(&self, state: &ProjectState) -> Result<()> {
        Ok(self.store.save(state)?)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        PathsConfig::resolve(&self.root, path)
    }

    pub fn drain(&self) -> DrainControl {
        DrainControl::new(self.resolve(&self.config.paths.drain_file))
    }

    pub fn requests(&self) -> RequestQueue {
        RequestQueue::new(self.resolve(&self.config.paths.request_dir))
    }

    pub fn run_marker(&self) -> RunMarker {
        RunMarker::new(self.resolve(&self.config.paths.run_marker))
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.run_marker().is_active()?)
    }

    /// Hand a mutation to the running scheduler. Returns `false` when no run
    /// is active and the caller should write state itself.
    pub fn submit_if_running(&self, out: &Output, request: ControlRequest) -> Result<bool> {
        if !self.is_running()? {
            return Ok(false);
        }
        let path = self.requests().submit(&request)?;
        println!(
            "{} {} request handed to the running scheduler",
            out.warn("queued:"),
            request.label()
        );
        println!("  {}", out.dim(&path.display().to_string()));
        Ok(true)
    }

    pub fn coordinator(&self) -> HumanInterventionCoordinator {
        HumanInterventionCoordinator::new(
            EnvFile::new(self.resolve(&self.config.paths.env_file)),
            BlockersDocument::new(self.resolve(&self.config.paths.blockers_document)),
        )
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(self.resolve(&self.config.paths.checkpoint_dir))
    }
}

/// Terminal styling, disabled when stdout is not a terminal or `NO_COLOR` is set.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    use_colors: bool,
}

impl Output {
    pub fn detect() -> Self {
        Self {
            use_colors: Term::stdout().is_term() && std::env::var_os("NO_COLOR").is_none(),
        }
    }

    pub fn header(&self, text: &str) -> String {
        if self.use_colors {
            text.cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn dim(&self, text: &str) -> String {
        if self.use_colors {
            text.dimmed().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn success(&self, text: &str) -> String {
        if self.use_colors {
            text.green().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn warn(&self, text: &str) -> String {
        if self.use_colors {
            text.yellow().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn error(&self, text: &str) -> String {
        if self.use_colors {
            text.red().bold().to_string()
        } else {
            text.to_string()
        }
    }
}
