use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ProjectState;
use crate::config::STATE_DIR_NAME;

const STATE_FILE_NAME: &str = "state.json";

/// Errors that can occur while loading or saving project state.
#[derive(Error, Debug)]
pub enum StateError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for state storage operations.
pub type StateResult<T> = Result<T, StateError>;

/// Project state persisted as a single JSON document under `.ralph/`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store for the project rooted at `project_root`.
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            path: project_root
                .as_ref()
                .join(STATE_DIR_NAME)
                .join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load state, or an empty state if none has been saved yet.
    ///
    /// Claims are kept as saved; the scheduler releases stale ones when it
    /// opens the project.
    pub fn load(&self) -> StateResult<ProjectState> {
        let mut state = match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str::<ProjectState>(&content)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => ProjectState::default(),
            Err(err) => return Err(StateError::Io(err)),
        };
        state.after_load();
        Ok(state)
    }

    /// Save state atomically (temp file, fsync, rename).
    pub fn save(&self, state: &ProjectState) -> StateResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::{DependencyEdge, DetectionMethod};
    use crate::feature::{Feature, FeatureId};
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_returns_empty_state() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = StateStore::new(temp_dir.path());
        let state = store.load().expect("load");
        assert!(state.features().is_empty());
        assert!(!store.exists());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = StateStore::new(temp_dir.path());

        let mut state = ProjectState::with_features(vec![
            Feature::new(1, "Auth", 1.0),
            Feature::new(2, "Profile", 2.0),
        ]);
        state.graph.upsert(DependencyEdge::new(
            FeatureId(2),
            FeatureId(1),
            0.95,
            DetectionMethod::ExplicitId,
        ));
        store.save(&state).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.features().len(), 2);
        assert_eq!(loaded.get(FeatureId(2)).expect("feature").name, "Profile");
        assert_eq!(loaded.graph.edge_count(), 1);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_keeps_claims() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = StateStore::new(temp_dir.path());

        let mut state = ProjectState::with_features(vec![Feature::new(1, "Auth", 1.0)]);
        state.try_claim(FeatureId(1), 0.6);
        store.save(&state).expect("save");

        let loaded = store.load().expect("load");
        assert!(loaded.get(FeatureId(1)).expect("feature").in_progress);
        assert_eq!(loaded.in_flight(), vec![FeatureId(1)]);
    }

    #[test]
    fn test_load_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = StateStore::new(temp_dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "{not json").expect("write");
        assert!(matches!(store.load(), Err(StateError::Json(_))));
    }
}
