//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use sigil_core::config::worker::WorkerConfig;
use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;
use sigil_entity::scan::{ScanOutput, Verdict};
use sigil_queue::memory::MemoryQueueStore;
use sigil_queue::{JobQueue, RetryPolicy};
use sigil_worker::adapters::{JsonFileResultStore, LogSink};
use sigil_worker::collaborators::{Downloader, Scanner};
use sigil_worker::{Collaborators, JobExecutor, Watcher, WorkerRunner};

/// Watcher that hands out a fixed batch on its first poll.
#[derive(Debug)]
pub struct ListWatcher {
    batch: Mutex<Vec<ScanJob>>,
}

impl ListWatcher {
    pub fn new(jobs: Vec<ScanJob>) -> Self {
        Self {
            batch: Mutex::new(jobs),
        }
    }
}

#[async_trait]
impl Watcher for ListWatcher {
    fn name(&self) -> &str {
        "list"
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(3600)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        Ok(std::mem::take(&mut *self.batch.lock().unwrap()))
    }
}

/// Downloader that writes one file, or reports failure.
#[derive(Debug, Default)]
pub struct StubDownloader {
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, job: &ScanJob, dest: &Path) -> AppResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dest.join("setup.py"), job.name.as_bytes())?;
        Ok(!self.fail)
    }
}

/// Scanner that records the order of scanned packages and returns a
/// fixed verdict, optionally after a delay.
#[derive(Debug)]
pub struct StubScanner {
    pub verdict: Verdict,
    pub delay: Duration,
    pub scanned: Mutex<Vec<String>>,
}

impl Default for StubScanner {
    fn default() -> Self {
        Self {
            verdict: Verdict::HighRisk,
            delay: Duration::ZERO,
            scanned: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Scanner for StubScanner {
    async fn scan(&self, dir: &Path) -> AppResult<ScanOutput> {
        let name = std::fs::read_to_string(dir.join("setup.py"))?;
        self.scanned.lock().unwrap().push(name);
        tokio::time::sleep(self.delay).await;
        Ok(ScanOutput {
            score: 61.0,
            verdict: self.verdict,
            files_scanned: 1,
            findings: vec![serde_json::json!({"rule": "install-hook"})],
            duration_ms: 12,
        })
    }
}

/// Memory queue, stub download and scan, and a real file result store.
pub struct TestBot {
    pub queue: JobQueue,
    pub downloader: Arc<StubDownloader>,
    pub scanner: Arc<StubScanner>,
    pub store: Arc<JsonFileResultStore>,
    pub worker: WorkerRunner,
    _results: TempDir,
}

impl TestBot {
    pub fn new(downloader: StubDownloader, scanner: StubScanner, scan_timeout: Duration) -> Self {
        let results = tempfile::tempdir().expect("Failed to create results dir");
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), RetryPolicy::immediate());
        let downloader = Arc::new(downloader);
        let scanner = Arc::new(scanner);
        let store = Arc::new(JsonFileResultStore::new(results.path()));

        let collaborators = Collaborators {
            downloader: downloader.clone(),
            scanner: scanner.clone(),
            store: store.clone(),
            publisher: Arc::new(LogSink),
            intelligence: Arc::new(LogSink),
        };
        let executor =
            JobExecutor::new(collaborators, &WorkerConfig::default()).with_scan_timeout(scan_timeout);
        let worker = WorkerRunner::new(
            queue.clone(),
            Arc::new(executor),
            "worker-it",
            Duration::from_secs(1),
            Duration::from_millis(10),
        );

        Self {
            queue,
            downloader,
            scanner,
            store,
            worker,
            _results: results,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            StubDownloader::default(),
            StubScanner::default(),
            Duration::from_secs(30),
        )
    }

    /// Run the worker until the queue stays empty.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while self
            .worker
            .run_once(Duration::ZERO)
            .await
            .expect("Worker iteration failed")
            .is_some()
        {
            processed += 1;
        }
        processed
    }
}
