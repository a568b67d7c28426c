use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CheckpointDecision, CheckpointRun};

const RUNS_FILE_NAME: &str = "runs.jsonl";
const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Errors that can occur while recording checkpoint runs.
#[derive(Error, Debug)]
pub enum CheckpointStoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for checkpoint store operations.
pub type CheckpointStoreResult<T> = Result<T, CheckpointStoreError>;

/// Summary of every run recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub run_count: u32,
    pub last_sequence: u32,
    pub last_decision: CheckpointDecision,
    pub last_run_at: DateTime<Utc>,
    pub pauses: u32,
}

/// Append-only log of checkpoint runs plus a manifest summary.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one run and update the manifest.
    pub fn append(&self, run: &CheckpointRun) -> CheckpointStoreResult<()> {
        fs::create_dir_all(&self.dir)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(RUNS_FILE_NAME))?;
        let json = serde_json::to_string(run)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;

        let previous = self.manifest()?;
        let manifest = CheckpointManifest {
            run_count: previous.as_ref().map_or(0, |m| m.run_count) + 1,
            last_sequence: run.sequence,
            last_decision: run.decision,
            last_run_at: run.started_at,
            pauses: previous.as_ref().map_or(0, |m| m.pauses)
                + u32::from(run.decision == CheckpointDecision::Pause),
        };
        self.write_manifest(&manifest)
    }

    /// Every recorded run, oldest first.
    pub fn list_runs(&self) -> CheckpointStoreResult<Vec<CheckpointRun>> {
        let file = match fs::File::open(self.dir.join(RUNS_FILE_NAME)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CheckpointStoreError::Io(err)),
        };
        let mut runs = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            runs.push(serde_json::from_str(&line)?);
        }
        Ok(runs)
    }

    pub fn latest(&self) -> CheckpointStoreResult<Option<CheckpointRun>> {
        Ok(self.list_runs()?.pop())
    }

    pub fn manifest(&self) -> CheckpointStoreResult<Option<CheckpointManifest>> {
        match fs::read_to_string(self.dir.join(MANIFEST_FILE_NAME)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CheckpointStoreError::Io(err)),
        }
    }

    fn write_manifest(&self, manifest: &CheckpointManifest) -> CheckpointStoreResult<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        let temp_path = self.dir.join(format!("{}.tmp", MANIFEST_FILE_NAME));

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.dir.join(MANIFEST_FILE_NAME))?;

        Ok(())
    }
}
