//! Contracts for the external systems a scan job passes through.
//!
//! Default implementations live in [`crate::adapters`]; production
//! deployments plug in their own.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;
use sigil_entity::scan::{ScanOutput, ScanRecord};

/// Fetches and unpacks the job's artifact into `dest`.
#[async_trait]
pub trait Downloader: Send + Sync + Debug {
    /// Returns `false` when the artifact could not be fetched.
    async fn download(&self, job: &ScanJob, dest: &Path) -> AppResult<bool>;
}

/// Analyzes an unpacked artifact.
#[async_trait]
pub trait Scanner: Send + Sync + Debug {
    /// Scan every file under `dir`.
    async fn scan(&self, dir: &Path) -> AppResult<ScanOutput>;
}

/// Persists scan outcomes and serves them back to the rescan scheduler.
#[async_trait]
pub trait ResultStore: Send + Sync + Debug {
    /// Persist a successful scan and return its result id.
    async fn store_result(&self, job: &ScanJob, output: &ScanOutput) -> AppResult<String>;

    /// Record a scan that failed before producing a verdict.
    async fn store_error(&self, job: &ScanJob, error: &str) -> AppResult<()>;

    /// Most recent non-error scan per artifact, limited to artifacts whose
    /// latest scan completed before `scanned_before`.
    async fn latest_scans(&self, scanned_before: DateTime<Utc>) -> AppResult<Vec<ScanRecord>>;
}

/// Distributes a stored result downstream. Best-effort.
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    /// Publish one stored result.
    async fn publish(&self, result_id: &str, job: &ScanJob, output: &ScanOutput) -> AppResult<()>;
}

/// Derives threat intelligence from a scan. Best-effort.
#[async_trait]
pub trait IntelligenceExtractor: Send + Sync + Debug {
    /// Extract intelligence from one scan.
    async fn extract(&self, job: &ScanJob, output: &ScanOutput) -> AppResult<()>;
}

/// The full set of collaborators a worker needs.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Artifact fetcher.
    pub downloader: Arc<dyn Downloader>,
    /// Content scanner.
    pub scanner: Arc<dyn Scanner>,
    /// Result persistence.
    pub store: Arc<dyn ResultStore>,
    /// Downstream distribution.
    pub publisher: Arc<dyn Publisher>,
    /// Intelligence extraction.
    pub intelligence: Arc<dyn IntelligenceExtractor>,
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use sigil_entity::scan::Verdict;

    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeDownloader {
        pub fail: bool,
        pub calls: AtomicUsize,
        pub workspaces: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, _job: &ScanJob, dest: &Path) -> AppResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.workspaces.lock().unwrap().push(dest.to_path_buf());
            std::fs::write(dest.join("index.js"), b"module.exports = {}")?;
            Ok(!self.fail)
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeScanner {
        pub delay: Duration,
        pub timed_out: bool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Scanner for FakeScanner {
        async fn scan(&self, _dir: &Path) -> AppResult<ScanOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.timed_out {
                return Err(sigil_core::AppError::timeout("sigil exceeded its deadline"));
            }
            Ok(ScanOutput {
                score: 3.0,
                verdict: Verdict::LowRisk,
                files_scanned: 1,
                findings: Vec::new(),
                duration_ms: 5,
            })
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingStore {
        pub results: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultStore for RecordingStore {
        async fn store_result(&self, job: &ScanJob, _output: &ScanOutput) -> AppResult<String> {
            self.results.lock().unwrap().push(job.id.clone());
            Ok(job.id.clone())
        }

        async fn store_error(&self, _job: &ScanJob, error: &str) -> AppResult<()> {
            self.errors.lock().unwrap().push(error.to_string());
            Ok(())
        }

        async fn latest_scans(&self, _before: DateTime<Utc>) -> AppResult<Vec<ScanRecord>> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub published: AtomicUsize,
        pub extracted: AtomicUsize,
    }

    #[async_trait]
    impl Publisher for RecordingSink {
        async fn publish(&self, _id: &str, _job: &ScanJob, _out: &ScanOutput) -> AppResult<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Err(sigil_core::AppError::external("downstream unavailable"))
        }
    }

    #[async_trait]
    impl IntelligenceExtractor for RecordingSink {
        async fn extract(&self, _job: &ScanJob, _output: &ScanOutput) -> AppResult<()> {
            self.extracted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fakes plus handles for asserting on them.
    #[derive(Debug, Default)]
    pub struct Fakes {
        pub downloader: Arc<FakeDownloader>,
        pub scanner: Arc<FakeScanner>,
        pub store: Arc<RecordingStore>,
        pub sink: Arc<RecordingSink>,
    }

    impl Fakes {
        pub fn collaborators(&self) -> Collaborators {
            Collaborators {
                downloader: self.downloader.clone(),
                scanner: self.scanner.clone(),
                store: self.store.clone(),
                publisher: self.sink.clone(),
                intelligence: self.sink.clone(),
            }
        }
    }
}
