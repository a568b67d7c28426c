//! Boundary to the external coding agent.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::feature::FeatureId;

/// Prefix of the output line an agent prints to report a skip.
pub const SKIP_MARKER: &str = "SKIP:";

/// Lines of stderr kept as a failure reason.
const STDERR_TAIL_LINES: usize = 20;

/// Errors launching or supervising a worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The agent process could not be started.
    #[error("failed to start agent '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error talking to the agent process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The agent did not finish in time.
    #[error("agent timed out after {0:?}")]
    Timeout(Duration),

    /// The worker task panicked.
    #[error("worker panicked")]
    Panicked,
}

/// One unit of work handed to an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub feature_id: FeatureId,
    pub instructions: String,
}

/// How an agent finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Passed,
    Failed(String),
    Skipped(String),
}

/// The agent performing the work. The scheduler knows nothing about how.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    async fn execute(&self, request: WorkRequest) -> Result<WorkOutcome, WorkerError>;
}

/// Runs an external command per feature.
///
/// The feature id is the last argument, instructions arrive on stdin. A
/// stdout line starting with `SKIP:` reports a skip; otherwise exit status 0
/// is a pass and anything else a failure carrying the stderr tail.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandWorker {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout: Duration::from_secs(1800),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Interpret the agent's output.
pub fn parse_outcome(success: bool, stdout: &str, stderr: &str) -> WorkOutcome {
    if let Some(reason) = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(SKIP_MARKER))
    {
        return WorkOutcome::Skipped(reason.trim().to_string());
    }
    if success {
        return WorkOutcome::Passed;
    }
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    if tail.is_empty() {
        WorkOutcome::Failed("agent exited with a failure status".to_string())
    } else {
        WorkOutcome::Failed(tail)
    }
}

#[async_trait]
impl WorkerAgent for CommandWorker {
    async fn execute(&self, request: WorkRequest) -> Result<WorkOutcome, WorkerError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(request.feature_id.to_string())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let feature_id = request.feature_id;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // An agent that ignores stdin may close it early.
                if let Err(err) = stdin.write_all(request.instructions.as_bytes()).await {
                    debug!(feature_id = %feature_id, error = %err, "agent closed stdin");
                }
            }
        };

        // Feeding stdin and collecting output share one deadline; a child
        // that never reads its input is killed on drop like any other.
        let interaction = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let output = tokio::time::timeout(self.timeout, interaction)
            .await
            .map_err(|_| WorkerError::Timeout(self.timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            feature_id = %feature_id,
            status = %output.status,
            "agent finished"
        );
        Ok(parse_outcome(output.status.success(), &stdout, &stderr))
    }
}
