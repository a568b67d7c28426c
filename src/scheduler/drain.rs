//! File-based drain control.
//!
//! The presence of the control file requests a pause. The scheduler polls
//! for it instead of holding a lock, so a pause requested while no process
//! is running still applies to the next one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

/// Errors reading or writing the drain control file. Always fatal to dispatch.
#[derive(Error, Debug)]
pub enum DrainError {
    /// IO error on the control file.
    #[error("drain control file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Handle on the drain control file.
#[derive(Debug, Clone)]
pub struct DrainControl {
    path: PathBuf,
}

impl DrainControl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> DrainError {
        DrainError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Create the control file. The reason is written into it for humans.
    pub fn request_pause(&self, reason: &str) -> Result<(), DrainError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
            }
        }
        let mut file = fs::File::create(&self.path).map_err(|err| self.io_error(err))?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), reason).map_err(|err| self.io_error(err))?;
        info!(path = %self.path.display(), reason, "drain requested");
        Ok(())
    }

    /// Remove the control file. Resuming when not paused is a no-op.
    pub fn resume(&self) -> Result<(), DrainError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "drain cleared");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    pub fn is_drain_requested(&self) -> Result<bool, DrainError> {
        self.path.try_exists().map_err(|err| self.io_error(err))
    }

    /// The reason written by [`DrainControl::request_pause`], if paused.
    pub fn reason(&self) -> Result<Option<String>, DrainError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }
}
