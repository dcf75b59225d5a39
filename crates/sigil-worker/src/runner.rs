//! Worker runner: main loop that dequeues scan jobs and resolves them.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sigil_core::config::worker::WorkerConfig;
use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;
use sigil_queue::JobQueue;

use crate::executor::{JobExecutionError, JobExecutor, WorkerState};

/// One consumer loop against the shared queue.
#[derive(Debug)]
pub struct WorkerRunner {
    /// Shared queue
    queue: JobQueue,
    /// Per-job pipeline
    executor: Arc<JobExecutor>,
    /// Worker identifier for logs
    worker_id: String,
    /// Longest single wait on an empty queue
    dequeue_timeout: Duration,
    /// Pause after a queue failure
    error_backoff: Duration,
    /// Current state, observable through [`WorkerRunner::subscribe`]
    state: watch::Sender<WorkerState>,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(
        queue: JobQueue,
        executor: Arc<JobExecutor>,
        worker_id: impl Into<String>,
        dequeue_timeout: Duration,
        error_backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            executor,
            worker_id: worker_id.into(),
            dequeue_timeout,
            error_backoff,
            state,
        }
    }

    /// Worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Watch the worker's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until the cancel signal is received. The current job is always
    /// resolved before the loop exits.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        info!(worker = %self.worker_id, "Scanner worker started");

        loop {
            // A dropped sender counts as a stop signal.
            if *cancel.borrow() || cancel.has_changed().is_err() {
                break;
            }
            self.state.send_replace(WorkerState::Idle);
            self.promote().await;

            self.state.send_replace(WorkerState::Dequeuing);
            let job = match self
                .queue
                .dequeue_or_stop(self.dequeue_timeout, &mut cancel)
                .await
            {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    error!(worker = %self.worker_id, error = %e, "Failed to dequeue job");
                    self.pause(&mut cancel).await;
                    continue;
                }
            };

            if let Err(e) = self.process(&job).await {
                error!(
                    worker = %self.worker_id,
                    job_id = %job.id,
                    error = %e,
                    "Failed to resolve job"
                );
                self.pause(&mut cancel).await;
            }
        }

        self.state.send_replace(WorkerState::Idle);
        info!(worker = %self.worker_id, "Scanner worker stopped");
    }

    /// One iteration without a stop signal: promote, dequeue (bounded by
    /// `timeout`), and process. `None` when the queue stayed empty.
    pub async fn run_once(&self, timeout: Duration) -> AppResult<Option<WorkerState>> {
        self.state.send_replace(WorkerState::Idle);
        self.promote().await;
        self.state.send_replace(WorkerState::Dequeuing);
        match self.queue.dequeue(timeout).await? {
            Some(job) => self.process(&job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn promote(&self) {
        if let Err(e) = self.queue.promote_delayed().await {
            warn!(worker = %self.worker_id, error = %e, "Failed to promote delayed retries");
        }
    }

    /// Execute one dequeued job and tell the queue the outcome.
    pub async fn process(&self, job: &ScanJob) -> AppResult<WorkerState> {
        info!(
            worker = %self.worker_id,
            job_id = %job.id,
            ecosystem = %job.ecosystem,
            name = %job.name,
            version = %job.version,
            priority = %job.priority,
            attempt = job.retries + 1,
            "Processing job"
        );

        let outcome = self.executor.execute(job, &self.state).await;
        let final_state = self.resolve(job, outcome).await?;
        self.state.send_replace(final_state);
        Ok(final_state)
    }

    async fn resolve(
        &self,
        job: &ScanJob,
        outcome: Result<String, JobExecutionError>,
    ) -> AppResult<WorkerState> {
        match outcome {
            Ok(_) => {
                self.queue.complete(job).await?;
                info!(worker = %self.worker_id, job_id = %job.id, "Job completed");
                Ok(WorkerState::Complete)
            }
            Err(JobExecutionError::InvalidJob(reason)) => {
                warn!(
                    worker = %self.worker_id,
                    job_id = %job.id,
                    name = ?job.name,
                    reason = %reason,
                    "Skipping invalid job"
                );
                self.queue.complete(job).await?;
                Ok(WorkerState::Complete)
            }
            Err(err @ JobExecutionError::ScanTimeout(_)) => {
                let message = err.to_string();
                warn!(worker = %self.worker_id, job_id = %job.id, "{message}");
                if let Err(e) = self
                    .executor
                    .collaborators()
                    .store
                    .store_error(job, &message)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "Failed to record scan timeout");
                }
                self.queue.complete(job).await?;
                Ok(WorkerState::Complete)
            }
            Err(JobExecutionError::Transient(message)) => {
                warn!(
                    worker = %self.worker_id,
                    job_id = %job.id,
                    retries = job.retries,
                    max_retries = job.max_retries,
                    error = %message,
                    "Job failed"
                );
                if job.can_retry() {
                    self.queue.retry(job).await?;
                    Ok(WorkerState::Retrying)
                } else {
                    self.queue.dead_letter(job, &message).await?;
                    Ok(WorkerState::DeadLettered)
                }
            }
        }
    }

    async fn pause(&self, cancel: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.error_backoff) => {}
            _ = cancel.changed() => {}
        }
    }
}

/// A fixed number of worker loops sharing one queue and one executor.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Arc<WorkerRunner>>,
    executor: Arc<JobExecutor>,
}

impl WorkerPool {
    /// Create `config.concurrency` workers, or `concurrency` when given.
    pub fn new(
        queue: JobQueue,
        executor: Arc<JobExecutor>,
        config: &WorkerConfig,
        dequeue_timeout: Duration,
        concurrency: Option<usize>,
    ) -> Self {
        let count = concurrency.unwrap_or(config.concurrency).max(1);
        let workers = (0..count)
            .map(|i| {
                Arc::new(WorkerRunner::new(
                    queue.clone(),
                    Arc::clone(&executor),
                    format!("worker-{i}"),
                    dequeue_timeout,
                    Duration::from_secs(config.error_backoff_seconds),
                ))
            })
            .collect();
        Self { workers, executor }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Spawn every worker loop.
    pub fn spawn(&self, cancel: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(concurrency = self.workers.len(), "Starting scanner workers");
        self.workers
            .iter()
            .map(|worker| {
                let worker = Arc::clone(worker);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(cancel).await })
            })
            .collect()
    }

    /// Workers currently inside a job.
    pub fn busy(&self) -> usize {
        self.workers.iter().filter(|w| w.state().is_busy()).count()
    }

    /// Wait for every spawned worker to finish its current job, then for
    /// side effects up to `grace`.
    ///
    /// Workers are never abandoned mid-job: once `grace` elapses this logs
    /// the stragglers and keeps waiting. Each job is itself bounded by the
    /// download and scan timeouts.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>, grace: Duration) {
        let workers = join_all(handles);
        tokio::pin!(workers);

        let results = match tokio::time::timeout(grace, &mut workers).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    busy = self.busy(),
                    grace_s = grace.as_secs(),
                    "Workers still finishing jobs after the grace period"
                );
                workers.await
            }
        };
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        let tracker = self.executor.side_effects();
        tracker.close();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                pending = tracker.len(),
                "Side-effect tasks still running at shutdown"
            );
        }
        info!("Scanner workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeDownloader, FakeScanner, Fakes};
    use sigil_queue::RetryPolicy;
    use sigil_queue::memory::MemoryQueueStore;
    use std::sync::atomic::Ordering;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryQueueStore::new()), RetryPolicy::immediate())
    }

    fn worker(queue: &JobQueue, fakes: &Fakes, scan_timeout: Duration) -> WorkerRunner {
        let executor = JobExecutor::new(fakes.collaborators(), &WorkerConfig::default())
            .with_scan_timeout(scan_timeout);
        WorkerRunner::new(
            queue.clone(),
            Arc::new(executor),
            "worker-test",
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_successful_job_is_stored_and_released() {
        let queue = queue();
        let fakes = Fakes::default();
        let worker = worker(&queue, &fakes, Duration::from_secs(5));
        let states = worker.subscribe();

        let job = ScanJob::new("npm", "agent-kit", "1.0.0");
        queue.enqueue(&job).await.unwrap();

        let state = worker.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(WorkerState::Complete));
        assert_eq!(*states.borrow(), WorkerState::Complete);
        assert_eq!(*fakes.store.results.lock().unwrap(), vec![job.id.clone()]);

        let tracker = worker.executor.side_effects();
        tracker.close();
        tracker.wait().await;
        assert_eq!(fakes.sink.published.load(Ordering::SeqCst), 1);
        assert_eq!(fakes.sink.extracted.load(Ordering::SeqCst), 1);

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.processing, 0);
        assert!(queue.enqueue(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_workspace_removed_after_job() {
        let queue = queue();
        let fakes = Fakes::default();
        let worker = worker(&queue, &fakes, Duration::from_secs(5));

        queue.enqueue(&ScanJob::new("npm", "agent-kit", "1.0.0")).await.unwrap();
        worker.run_once(Duration::ZERO).await.unwrap();

        let workspaces = fakes.downloader.workspaces.lock().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert!(!workspaces[0].exists());
    }

    #[tokio::test]
    async fn test_download_failure_retries_then_dead_letters() {
        let queue = queue();
        let fakes = Fakes {
            downloader: Arc::new(FakeDownloader {
                fail: true,
                ..FakeDownloader::default()
            }),
            ..Fakes::default()
        };
        let worker = worker(&queue, &fakes, Duration::from_secs(5));

        let job = ScanJob::new("pypi", "rag-utils", "0.2.0").with_max_retries(2);
        queue.enqueue(&job).await.unwrap();

        for _ in 0..2 {
            let state = worker.run_once(Duration::ZERO).await.unwrap();
            assert_eq!(state, Some(WorkerState::Retrying));
        }
        let state = worker.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(WorkerState::DeadLettered));

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.retries, 2);
        assert_eq!(dead[0].error, "Download failed for pypi/rag-utils");

        assert_eq!(worker.run_once(Duration::ZERO).await.unwrap(), None);
        assert_eq!(fakes.downloader.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fakes.scanner.calls.load(Ordering::SeqCst), 0);
        assert!(fakes.store.results.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_records_error_without_retry() {
        let queue = queue();
        let fakes = Fakes {
            scanner: Arc::new(FakeScanner {
                delay: Duration::from_secs(30),
                ..FakeScanner::default()
            }),
            ..Fakes::default()
        };
        let worker = worker(&queue, &fakes, Duration::from_secs(2));

        queue.enqueue(&ScanJob::new("npm", "slow-agent", "1.0.0")).await.unwrap();
        let state = worker.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(WorkerState::Complete));

        assert_eq!(
            *fakes.store.errors.lock().unwrap(),
            vec!["Scan timed out after 2s".to_string()]
        );
        assert!(fakes.store.results.lock().unwrap().is_empty());

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.delayed, 0);
        assert_eq!(depth.dead_letter, 0);
        assert_eq!(depth.processing, 0);
    }

    #[tokio::test]
    async fn test_scanner_timeout_error_is_not_retried() {
        let queue = queue();
        let fakes = Fakes {
            scanner: Arc::new(FakeScanner {
                timed_out: true,
                ..FakeScanner::default()
            }),
            ..Fakes::default()
        };
        let worker = worker(&queue, &fakes, Duration::from_secs(7));

        queue.enqueue(&ScanJob::new("npm", "hung-agent", "1.0.0")).await.unwrap();
        let state = worker.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(WorkerState::Complete));

        assert_eq!(
            *fakes.store.errors.lock().unwrap(),
            vec!["Scan timed out after 7s".to_string()]
        );
        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.delayed, 0);
        assert_eq!(depth.dead_letter, 0);
    }

    #[tokio::test]
    async fn test_invalid_name_completes_without_collaborators() {
        let queue = queue();
        let fakes = Fakes::default();
        let worker = worker(&queue, &fakes, Duration::from_secs(5));

        queue.enqueue(&ScanJob::new("pypi", "bad name", "1.0")).await.unwrap();
        let state = worker.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(WorkerState::Complete));

        assert_eq!(fakes.downloader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fakes.scanner.calls.load(Ordering::SeqCst), 0);
        assert!(fakes.store.results.lock().unwrap().is_empty());
        assert!(fakes.store.errors.lock().unwrap().is_empty());
        assert_eq!(queue.queue_depth().await.unwrap().dead_letter, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_drains_and_stops() {
        let queue = queue();
        let fakes = Fakes::default();
        let executor = Arc::new(JobExecutor::new(
            fakes.collaborators(),
            &WorkerConfig::default(),
        ));
        let pool = WorkerPool::new(
            queue.clone(),
            executor,
            &WorkerConfig::default(),
            Duration::from_secs(1),
            Some(2),
        );
        assert_eq!(pool.size(), 2);

        for name in ["a-agent", "b-agent", "c-agent"] {
            queue.enqueue(&ScanJob::new("npm", name, "1.0.0")).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handles = pool.spawn(&rx);
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        pool.shutdown(handles, Duration::from_secs(5)).await;

        assert_eq!(fakes.store.results.lock().unwrap().len(), 3);
        assert_eq!(fakes.sink.published.load(Ordering::SeqCst), 3);
        assert_eq!(queue.queue_depth().await.unwrap().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_job_past_grace() {
        let queue = queue();
        let fakes = Fakes {
            scanner: Arc::new(FakeScanner {
                delay: Duration::from_secs(60),
                ..FakeScanner::default()
            }),
            ..Fakes::default()
        };
        let config = WorkerConfig::default();
        let executor = Arc::new(JobExecutor::new(fakes.collaborators(), &config));
        let pool = WorkerPool::new(queue.clone(), executor, &config, Duration::from_secs(1), Some(1));

        queue.enqueue(&ScanJob::new("npm", "slow-agent", "1.0.0")).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handles = pool.spawn(&rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pool.busy(), 1);

        tx.send(true).unwrap();
        pool.shutdown(handles, Duration::from_secs(30)).await;

        assert_eq!(pool.busy(), 0);
        assert_eq!(queue.queue_depth().await.unwrap().processing, 0);
        assert_eq!(fakes.store.results.lock().unwrap().len(), 1);
    }
}
