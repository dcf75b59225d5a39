//! Registry watcher contract and its polling loop.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info};

use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;
use sigil_queue::JobQueue;

/// A source registry that produces scan jobs when polled.
#[async_trait]
pub trait Watcher: Send + Sync + Debug {
    /// Stable name; also the checkpoint key.
    fn name(&self) -> &str;

    /// Sleep between polls.
    fn poll_interval(&self) -> Duration;

    /// Fetch whatever is new since the last checkpoint.
    async fn poll(&self) -> AppResult<Vec<ScanJob>>;
}

/// A watcher's handle on its own checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    queue: JobQueue,
    watcher: String,
}

impl CheckpointStore {
    /// Bind the checkpoint for `watcher`.
    pub fn new(queue: JobQueue, watcher: impl Into<String>) -> Self {
        Self {
            queue,
            watcher: watcher.into(),
        }
    }

    /// Last saved position, if any.
    pub async fn load(&self) -> AppResult<Option<String>> {
        self.queue.load_checkpoint(&self.watcher).await
    }

    /// Overwrite the saved position.
    pub async fn save(&self, value: &str) -> AppResult<()> {
        self.queue.save_checkpoint(&self.watcher, value).await
    }
}

/// Counts from one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Jobs the watcher returned.
    pub new: usize,
    /// Jobs admitted to the queue.
    pub enqueued: usize,
    /// Jobs rejected as duplicates.
    pub duplicates: usize,
}

/// Drives one watcher: poll, enqueue, sleep, until stopped.
#[derive(Debug)]
pub struct WatcherRunner {
    watcher: Arc<dyn Watcher>,
    queue: JobQueue,
    max_retries: u32,
}

impl WatcherRunner {
    /// Create a runner; every produced job gets `max_retries` as its
    /// retry budget.
    pub fn new(watcher: Arc<dyn Watcher>, queue: JobQueue, max_retries: u32) -> Self {
        Self {
            watcher,
            queue,
            max_retries,
        }
    }

    /// Name of the driven watcher.
    pub fn name(&self) -> &str {
        self.watcher.name()
    }

    /// Poll once and enqueue everything returned.
    pub async fn poll_once(&self) -> AppResult<PollStats> {
        let jobs = self.watcher.poll().await?;
        let mut stats = PollStats {
            new: jobs.len(),
            ..PollStats::default()
        };

        for job in jobs {
            let job = job.with_max_retries(self.max_retries);
            if self.queue.enqueue(&job).await? {
                stats.enqueued += 1;
            } else {
                stats.duplicates += 1;
            }
        }

        if stats.new > 0 {
            info!(
                watcher = %self.watcher.name(),
                new = stats.new,
                enqueued = stats.enqueued,
                dedup_filtered = stats.duplicates,
                "Watcher poll complete"
            );
        }
        Ok(stats)
    }

    /// Run until the cancel signal is received. Poll failures are logged
    /// and the loop carries on.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let interval = self.watcher.poll_interval();
        info!(
            watcher = %self.watcher.name(),
            interval_s = interval.as_secs(),
            "Watcher started"
        );

        loop {
            if *cancel.borrow() {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(watcher = %self.watcher.name(), error = %e, "Watcher poll failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(watcher = %self.watcher.name(), "Watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::error::AppError;
    use sigil_queue::RetryPolicy;
    use sigil_queue::memory::MemoryQueueStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct ScriptedWatcher {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl Watcher for ScriptedWatcher {
        fn name(&self) -> &str {
            "scripted"
        }

        fn poll_interval(&self) -> Duration {
            Duration::from_secs(60)
        }

        async fn poll(&self) -> AppResult<Vec<ScanJob>> {
            match self.polls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(AppError::external("registry unavailable")),
                _ => Ok(vec![
                    ScanJob::new("npm", "a", "1"),
                    ScanJob::new("npm", "a", "1"),
                    ScanJob::new("npm", "b", "1"),
                ]),
            }
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryQueueStore::new()), RetryPolicy::immediate())
    }

    #[tokio::test]
    async fn test_poll_once_counts_duplicates() {
        let queue = queue();
        let watcher = Arc::new(ScriptedWatcher::default());
        watcher.polls.store(1, Ordering::SeqCst);
        let runner = WatcherRunner::new(watcher, queue.clone(), 5);

        let stats = runner.poll_once().await.unwrap();
        assert_eq!(
            stats,
            PollStats {
                new: 3,
                enqueued: 2,
                duplicates: 1
            }
        );

        let job = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(job.max_retries, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_does_not_stop_loop() {
        let queue = queue();
        let watcher = Arc::new(ScriptedWatcher::default());
        let runner = Arc::new(WatcherRunner::new(watcher.clone(), queue.clone(), 3));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(rx).await })
        };

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(watcher.polls.load(Ordering::SeqCst) >= 2);
        assert_eq!(queue.queue_depth().await.unwrap().normal, 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_store_is_per_watcher() {
        let queue = queue();
        let npm = CheckpointStore::new(queue.clone(), "npm");
        let pypi = CheckpointStore::new(queue, "pypi");

        npm.save("42").await.unwrap();
        assert_eq!(npm.load().await.unwrap().as_deref(), Some("42"));
        assert_eq!(pypi.load().await.unwrap(), None);
    }
}
