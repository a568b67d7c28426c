//! Control requests from other processes.
//!
//! While a run is active the scheduler is the only writer of project state.
//! CLI commands that would mutate it instead drop a request file into the
//! request directory; the dispatch loop picks requests up on every poll and
//! applies them under the state lock. The run marker tells the CLI which
//! path to take.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::feature::{FeatureId, FeatureSpec};

const REQUEST_EXTENSION: &str = "json";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors reading or writing request files.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("control request {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("control request encoding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("a scheduler run is already active ({path}); remove the file if that process is gone")]
    AlreadyRunning { path: PathBuf },
}

/// A state mutation queued for the running scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlRequest {
    Unblock { feature_id: FeatureId },
    UnblockAll,
    ResolveAssumption { assumption_id: u64, valid: bool },
    Import { features: Vec<FeatureSpec> },
    AnalyzeDependencies,
    Checkpoint,
}

impl ControlRequest {
    pub fn label(&self) -> &'static str {
        match self {
            ControlRequest::Unblock { .. } => "unblock",
            ControlRequest::UnblockAll => "unblock_all",
            ControlRequest::ResolveAssumption { .. } => "resolve_assumption",
            ControlRequest::Import { .. } => "import",
            ControlRequest::AnalyzeDependencies => "analyze_dependencies",
            ControlRequest::Checkpoint => "checkpoint",
        }
    }
}

/// Directory of pending request files, one JSON document each.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    dir: PathBuf,
}

impl RequestQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(path: &Path, source: io::Error) -> RequestError {
        RequestError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Queue a request. The file appears atomically (temp file, fsync, rename).
    pub fn submit(&self, request: &ControlRequest) -> Result<PathBuf, RequestError> {
        fs::create_dir_all(&self.dir).map_err(|err| Self::io_error(&self.dir, err))?;

        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let sequence = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{:020}-{}-{:04}", stamp, process::id(), sequence);
        let path = self.dir.join(&name).with_extension(REQUEST_EXTENSION);
        let temp_path = self.dir.join(format!(".{}.tmp", name));

        let json = serde_json::to_vec_pretty(request)?;
        let mut file = fs::File::create(&temp_path).map_err(|err| Self::io_error(&temp_path, err))?;
        file.write_all(&json)
            .and_then(|()| file.sync_all())
            .map_err(|err| Self::io_error(&temp_path, err))?;
        fs::rename(&temp_path, &path).map_err(|err| Self::io_error(&path, err))?;

        debug!(path = %path.display(), kind = request.label(), "control request queued");
        Ok(path)
    }

    /// Remove and return every pending request, oldest first. Unreadable
    /// files are logged and discarded.
    pub fn take(&self) -> Result<Vec<ControlRequest>, RequestError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_error(&self.dir, err)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| Self::io_error(&self.dir, err))?.path();
            if path.extension().is_some_and(|ext| ext == REQUEST_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut requests = Vec::with_capacity(paths.len());
        for path in paths {
            let content = fs::read(&path).map_err(|err| Self::io_error(&path, err))?;
            fs::remove_file(&path).map_err(|err| Self::io_error(&path, err))?;
            match serde_json::from_slice::<ControlRequest>(&content) {
                Ok(request) => requests.push(request),
                Err(err) => warn!(path = %path.display(), error = %err, "discarding malformed control request"),
            }
        }
        Ok(requests)
    }

    pub fn pending(&self) -> Result<usize, RequestError> {
        match fs::read_dir(&self.dir) {
            Ok(entries) => Ok(entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext == REQUEST_EXTENSION)
                })
                .count()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(err) => Err(Self::io_error(&self.dir, err)),
        }
    }
}

/// Marker file present while a scheduler run is active.
#[derive(Debug, Clone)]
pub struct RunMarker {
    path: PathBuf,
}

impl RunMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_active(&self) -> Result<bool, RequestError> {
        self.path
            .try_exists()
            .map_err(|err| RequestError::Io {
                path: self.path.clone(),
                source: err,
            })
    }

    /// Create the marker and return a guard that removes it on drop. Fails
    /// if another run already holds it.
    pub fn acquire(&self) -> Result<RunGuard, RequestError> {
        let io_error = |source| RequestError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RequestError::AlreadyRunning {
                    path: self.path.clone(),
                })
            }
            Err(err) => return Err(io_error(err)),
        };
        let guard = RunGuard {
            path: self.path.clone(),
        };
        writeln!(file, "{} {}", process::id(), Utc::now().to_rfc3339()).map_err(io_error)?;
        Ok(guard)
    }
}

/// Removes the run marker when the run ends, including on error.
#[derive(Debug)]
pub struct RunGuard {
    path: PathBuf,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove run marker");
            }
        }
    }
}
