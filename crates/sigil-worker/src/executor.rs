//! Job executor: runs one scan job through download, scan, store, and
//! publish.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sigil_core::config::worker::WorkerConfig;
use sigil_core::error::AppError;
use sigil_entity::job::ScanJob;
use sigil_entity::scan::ScanOutput;

use crate::collaborators::Collaborators;

/// Where a worker is in its per-job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between jobs.
    Idle,
    /// Waiting on the queue.
    Dequeuing,
    /// Fetching the artifact.
    Downloading,
    /// Running the scanner.
    Scanning,
    /// Persisting the result.
    Storing,
    /// Handing off best-effort side effects.
    Publishing,
    /// Job resolved and released.
    Complete,
    /// Job parked for a delayed retry.
    Retrying,
    /// Job moved to the dead-letter list.
    DeadLettered,
}

impl WorkerState {
    /// Whether the worker holds a dequeued job.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Downloading | Self::Scanning | Self::Storing | Self::Publishing
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dequeuing => "dequeuing",
            Self::Downloading => "downloading",
            Self::Scanning => "scanning",
            Self::Storing => "storing",
            Self::Publishing => "publishing",
            Self::Complete => "complete",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

/// Error from job execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobExecutionError {
    /// Download, store, or unexpected failure; retried with backoff
    #[error("{0}")]
    Transient(String),

    /// Scanner exceeded its time budget; recorded, never retried
    #[error("Scan timed out after {0}s")]
    ScanTimeout(u64),

    /// Job cannot be processed at all; completed as a no-op
    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

impl From<AppError> for JobExecutionError {
    fn from(err: AppError) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Runs scan jobs against the configured collaborators.
#[derive(Debug)]
pub struct JobExecutor {
    /// External systems
    collaborators: Collaborators,
    /// Scanner time budget
    scan_timeout: Duration,
    /// Parent directory for job workspaces; system temp when unset
    workspace_root: Option<PathBuf>,
    /// Fire-and-forget publish and intelligence tasks
    side_effects: TaskTracker,
}

impl JobExecutor {
    /// Create an executor from worker configuration.
    pub fn new(collaborators: Collaborators, config: &WorkerConfig) -> Self {
        Self {
            collaborators,
            scan_timeout: Duration::from_secs(config.scan_timeout_seconds),
            workspace_root: config.workspace_root.as_ref().map(PathBuf::from),
            side_effects: TaskTracker::new(),
        }
    }

    /// Override the scanner time budget.
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Collaborators in use.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Tracker for spawned side effects; closed and awaited at shutdown.
    pub fn side_effects(&self) -> &TaskTracker {
        &self.side_effects
    }

    /// Scanner time budget in whole seconds.
    pub fn scan_timeout_secs(&self) -> u64 {
        self.scan_timeout.as_secs()
    }

    /// Run one job up to the point where the queue must be told the
    /// outcome. Returns the stored result id.
    ///
    /// The workspace is removed when this returns, on every path.
    pub async fn execute(
        &self,
        job: &ScanJob,
        state: &watch::Sender<WorkerState>,
    ) -> Result<String, JobExecutionError> {
        job.validate_name()
            .map_err(|e| JobExecutionError::InvalidJob(e.message))?;

        let workspace = self.workspace(job)?;
        debug!(job_id = %job.id, path = %workspace.path().display(), "Workspace created");

        state.send_replace(WorkerState::Downloading);
        let downloaded = self
            .collaborators
            .downloader
            .download(job, workspace.path())
            .await?;
        if !downloaded {
            return Err(JobExecutionError::Transient(format!(
                "Download failed for {}/{}",
                job.ecosystem, job.name
            )));
        }

        state.send_replace(WorkerState::Scanning);
        let scan = self.collaborators.scanner.scan(workspace.path());
        let output = match tokio::time::timeout(self.scan_timeout, scan).await {
            Ok(Ok(output)) => output,
            // Scanners with their own deadline report it as a timeout error.
            Ok(Err(e)) if e.is_timeout() => {
                debug!(job_id = %job.id, error = %e, "Scanner reported a timeout");
                return Err(JobExecutionError::ScanTimeout(self.scan_timeout.as_secs()));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(JobExecutionError::ScanTimeout(self.scan_timeout.as_secs()));
            }
        };

        state.send_replace(WorkerState::Storing);
        let result_id = self.collaborators.store.store_result(job, &output).await?;
        info!(
            job_id = %job.id,
            result_id = %result_id,
            verdict = %output.verdict,
            score = output.score,
            findings = output.findings_count(),
            "Scan result stored"
        );

        state.send_replace(WorkerState::Publishing);
        self.spawn_side_effects(&result_id, job, output);

        Ok(result_id)
    }

    fn workspace(&self, job: &ScanJob) -> Result<TempDir, JobExecutionError> {
        let prefix = format!("sigil-bot-{}-", job.ecosystem);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| JobExecutionError::Transient(format!("Failed to create workspace: {e}")))
    }

    fn spawn_side_effects(&self, result_id: &str, job: &ScanJob, output: ScanOutput) {
        let publisher = self.collaborators.publisher.clone();
        let intelligence = self.collaborators.intelligence.clone();
        let result_id = result_id.to_string();
        let job = job.clone();

        self.side_effects.spawn(async move {
            if let Err(e) = publisher.publish(&result_id, &job, &output).await {
                warn!(result_id = %result_id, error = %e, "Publish failed (non-fatal)");
            }
            if let Err(e) = intelligence.extract(&job, &output).await {
                debug!(job_id = %job.id, error = %e, "Intelligence extraction skipped");
            }
        });
    }
}
