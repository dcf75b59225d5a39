//! Queue engine: priority lanes, dedup, delayed retries, dead letters,
//! and watcher checkpoints on top of a [`QueueStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::{DeadLetterEntry, ScanJob};

use crate::backoff::RetryPolicy;
use crate::store::{ProcessingEntry, QueueDepth, QueueStore};

/// Shared handle to the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    retry_policy: RetryPolicy,
}

impl JobQueue {
    /// Create a queue over a backing store.
    pub fn new(store: Arc<dyn QueueStore>, retry_policy: RetryPolicy) -> Self {
        Self {
            store,
            retry_policy,
        }
    }

    /// Retry delay table in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Admit a job unless its dedup key is already in flight.
    ///
    /// Stamps `enqueued_at` when absent. A rejected duplicate returns
    /// `false` and is only logged.
    pub async fn enqueue(&self, job: &ScanJob) -> AppResult<bool> {
        let mut job = job.clone();
        if job.enqueued_at.is_none() {
            job.enqueued_at = Some(Utc::now());
        }

        let admitted = self.store.enqueue(&job).await?;
        if admitted {
            debug!(
                job_id = %job.id,
                ecosystem = %job.ecosystem,
                name = %job.name,
                lane = %job.lane(),
                "Job enqueued"
            );
        } else {
            debug!(
                dedup_key = %job.dedup_key(),
                "Duplicate job rejected"
            );
        }
        Ok(admitted)
    }

    /// Take the next job in strict lane order, waiting up to `timeout` for
    /// one to arrive. `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> AppResult<Option<ScanJob>> {
        self.dequeue_inner(timeout, None).await
    }

    /// Like [`JobQueue::dequeue`], but gives up early once `stop` flips to
    /// `true`. Only the wait between pops is interrupted, so a popped job
    /// is always returned.
    pub async fn dequeue_or_stop(
        &self,
        timeout: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> AppResult<Option<ScanJob>> {
        self.dequeue_inner(timeout, Some(stop)).await
    }

    async fn dequeue_inner(
        &self,
        timeout: Duration,
        mut stop: Option<&mut watch::Receiver<bool>>,
    ) -> AppResult<Option<ScanJob>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.store.pop(Utc::now()).await? {
                debug!(job_id = %job.id, lane = %job.lane(), "Job dequeued");
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match stop.as_deref_mut() {
                Some(stop) => {
                    if *stop.borrow() {
                        return Ok(None);
                    }
                    tokio::select! {
                        _ = self.store.wait_for_arrival(deadline - now) => {}
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                return Ok(None);
                            }
                        }
                    }
                }
                None => self.store.wait_for_arrival(deadline - now).await,
            }
        }
    }

    /// Resolve a job; it leaves the system and its dedup key is released.
    pub async fn complete(&self, job: &ScanJob) -> AppResult<()> {
        self.store.complete(job).await?;
        debug!(job_id = %job.id, "Job completed");
        Ok(())
    }

    /// Park a job for another attempt after the delay for its next retry
    /// count. Returns the job as it was parked.
    pub async fn retry(&self, job: &ScanJob) -> AppResult<ScanJob> {
        let mut job = job.clone();
        job.retries += 1;
        let delay = self.retry_policy.delay_for(job.retries);
        let ready_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "Retry delay of {}s is out of range",
                    delay.as_secs()
                ))
            })?;

        self.store.schedule_retry(&job, ready_at).await?;
        info!(
            job_id = %job.id,
            retries = job.retries,
            max_retries = job.max_retries,
            delay_s = delay.as_secs(),
            "Job scheduled for retry"
        );
        Ok(job)
    }

    /// Move a job to the dead-letter list. Terminal.
    pub async fn dead_letter(&self, job: &ScanJob, error: &str) -> AppResult<()> {
        let entry = DeadLetterEntry::new(job.clone(), error);
        self.store.dead_letter(&entry).await?;
        warn!(
            job_id = %job.id,
            ecosystem = %job.ecosystem,
            name = %job.name,
            retries = job.retries,
            error,
            "Job moved to dead letter"
        );
        Ok(())
    }

    /// Return every ready delayed retry to its lane.
    pub async fn promote_delayed(&self) -> AppResult<u64> {
        self.promote_delayed_at(Utc::now()).await
    }

    /// Return every retry ready at `now` to its lane.
    pub async fn promote_delayed_at(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let moved = self.store.promote_ready(now).await?;
        if moved > 0 {
            info!(count = moved, "Promoted delayed retries");
        }
        Ok(moved)
    }

    /// Overwrite a watcher's checkpoint.
    pub async fn save_checkpoint(&self, watcher: &str, value: &str) -> AppResult<()> {
        self.store.set_checkpoint(watcher, value).await
    }

    /// Read a watcher's checkpoint.
    pub async fn load_checkpoint(&self, watcher: &str) -> AppResult<Option<String>> {
        self.store.get_checkpoint(watcher).await
    }

    /// Sizes of every queue structure.
    pub async fn queue_depth(&self) -> AppResult<QueueDepth> {
        self.store.depth().await
    }

    /// Newest dead-letter entries first.
    pub async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry>> {
        self.store.dead_letters(limit).await
    }

    /// Jobs currently held by workers, oldest first.
    pub async fn processing_entries(&self) -> AppResult<Vec<ProcessingEntry>> {
        self.store.processing_entries().await
    }

    /// Check backend connectivity.
    pub async fn health_check(&self) -> AppResult<bool> {
        self.store.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueueStore;
    use sigil_entity::job::metadata::keys;
    use sigil_entity::job::{JobMetadata, Lane};

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(MemoryQueueStore::new()), RetryPolicy::default())
    }

    async fn take(queue: &JobQueue) -> ScanJob {
        queue.dequeue(Duration::ZERO).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_depth_grows_by_one() {
        let queue = queue();
        let first = ScanJob::new("npm", "left-pad", "1.3.0");
        let second = ScanJob::new("npm", "left-pad", "1.3.0").with_priority("critical");

        assert!(queue.enqueue(&first).await.unwrap());
        assert!(!queue.enqueue(&second).await.unwrap());

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.pending(), 1);
        assert_eq!(depth.normal, 1);
        assert_eq!(depth.critical, 0);
    }

    #[tokio::test]
    async fn test_content_hash_distinguishes_jobs() {
        let queue = queue();
        let a = ScanJob::new("clawhub", "skill", "1")
            .with_metadata(JobMetadata::new().with(keys::CONTENT_HASH, "aaa"));
        let b = ScanJob::new("clawhub", "skill", "1")
            .with_metadata(JobMetadata::new().with(keys::CONTENT_HASH, "bbb"));
        assert!(queue.enqueue(&a).await.unwrap());
        assert!(queue.enqueue(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_strict_lane_order() {
        let queue = queue();
        for (name, priority) in [("n", "normal"), ("c", "critical"), ("h", "high")] {
            let job = ScanJob::new("npm", name, "1").with_priority(priority);
            queue.enqueue(&job).await.unwrap();
        }

        let order: Vec<String> = vec![
            take(&queue).await.priority,
            take(&queue).await.priority,
            take(&queue).await.priority,
        ];
        assert_eq!(order, vec!["critical", "high", "normal"]);
    }

    #[tokio::test]
    async fn test_fifo_within_lane() {
        let queue = queue();
        for name in ["one", "two", "three"] {
            queue.enqueue(&ScanJob::new("npm", name, "1")).await.unwrap();
        }
        assert_eq!(take(&queue).await.name, "one");
        assert_eq!(take(&queue).await.name, "two");
        assert_eq!(take(&queue).await.name, "three");
    }

    #[tokio::test]
    async fn test_unrecognized_priority_served_from_normal() {
        let queue = queue();
        queue
            .enqueue(&ScanJob::new("pypi", "slow", "1").with_priority("low"))
            .await
            .unwrap();
        queue
            .enqueue(&ScanJob::new("pypi", "odd", "1").with_priority("whenever"))
            .await
            .unwrap();

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.normal, 2);

        let job = take(&queue).await;
        assert_eq!(job.lane(), Lane::Normal);
        assert_eq!(job.priority, "low");
    }

    #[tokio::test]
    async fn test_enqueue_stamps_time_once() {
        let queue = queue();
        queue.enqueue(&ScanJob::new("npm", "a", "1")).await.unwrap();
        let job = take(&queue).await;
        let stamped = job.enqueued_at.unwrap();

        queue.retry(&job).await.unwrap();
        let far_future = Utc::now() + chrono::Duration::days(1);
        queue.promote_delayed_at(far_future).await.unwrap();
        let again = take(&queue).await;
        assert_eq!(again.enqueued_at, Some(stamped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_times_out_empty() {
        let queue = queue();
        let started = Instant::now();
        let job = queue.dequeue(Duration::from_secs(5)).await.unwrap();
        assert!(job.is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wakes_on_arrival() {
        let queue = queue();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(&ScanJob::new("npm", "late", "1")).await.unwrap();

        let job = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(job.name, "late");
    }

    #[tokio::test]
    async fn test_complete_releases_dedup_key() {
        let queue = queue();
        let job = ScanJob::new("npm", "a", "1");
        queue.enqueue(&job).await.unwrap();
        let job = take(&queue).await;
        assert_eq!(queue.queue_depth().await.unwrap().processing, 1);

        queue.complete(&job).await.unwrap();
        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.processing, 0);
        assert_eq!(depth.pending(), 0);
        assert!(queue.enqueue(&ScanJob::new("npm", "a", "1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_parks_until_delay_elapses() {
        let queue = queue();
        queue
            .enqueue(&ScanJob::new("npm", "flaky", "1").with_priority("high"))
            .await
            .unwrap();

        let mut job = take(&queue).await;
        for k in 1..=3u32 {
            let parked = queue.retry(&job).await.unwrap();
            assert_eq!(parked.retries, k);

            let depth = queue.queue_depth().await.unwrap();
            assert_eq!(depth.processing, 0);
            assert_eq!(depth.pending(), 0);
            assert_eq!(depth.delayed, 1);

            assert_eq!(queue.promote_delayed().await.unwrap(), 0);
            assert!(!queue.enqueue(&ScanJob::new("npm", "flaky", "1")).await.unwrap());

            let delay = queue.retry_policy().delay_for(k);
            let ready = Utc::now() + chrono::Duration::from_std(delay).unwrap();
            assert_eq!(queue.promote_delayed_at(ready).await.unwrap(), 1);
            assert_eq!(queue.promote_delayed_at(ready).await.unwrap(), 0);

            let depth = queue.queue_depth().await.unwrap();
            assert_eq!(depth.high, 1);
            assert_eq!(depth.delayed, 0);

            job = take(&queue).await;
            assert_eq!(job.retries, k);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_retry_delay_is_a_configuration_error() {
        let queue = JobQueue::new(
            Arc::new(MemoryQueueStore::new()),
            RetryPolicy::new(vec![Duration::from_secs(u64::MAX)], Duration::ZERO),
        );
        queue.enqueue(&ScanJob::new("npm", "flaky", "1")).await.unwrap();
        let job = take(&queue).await;

        let err = queue.retry(&job).await.unwrap_err();
        assert_eq!(err.kind, sigil_core::error::ErrorKind::Configuration);

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.delayed, 0);
        assert_eq!(depth.pending(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_is_terminal() {
        let queue = queue();
        queue.enqueue(&ScanJob::new("npm", "broken", "1")).await.unwrap();
        let mut job = take(&queue).await;

        while job.can_retry() {
            queue.retry(&job).await.unwrap();
            queue
                .promote_delayed_at(Utc::now() + chrono::Duration::days(1))
                .await
                .unwrap();
            job = take(&queue).await;
        }
        queue.dead_letter(&job, "download failed").await.unwrap();

        let entries = queue.dead_letters(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error, "download failed");
        assert_eq!(entries[0].job.retries, 3);

        let depth = queue.queue_depth().await.unwrap();
        assert_eq!(depth.dead_letter, 1);
        assert_eq!(depth.pending() + depth.processing + depth.delayed, 0);
        assert_eq!(
            queue
                .promote_delayed_at(Utc::now() + chrono::Duration::days(30))
                .await
                .unwrap(),
            0
        );
        assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promote_with_nothing_ready_changes_nothing() {
        let queue = queue();
        queue.enqueue(&ScanJob::new("npm", "a", "1")).await.unwrap();
        let before = queue.queue_depth().await.unwrap();
        assert_eq!(queue.promote_delayed().await.unwrap(), 0);
        assert_eq!(queue.queue_depth().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let queue = queue();
        assert_eq!(queue.load_checkpoint("npm").await.unwrap(), None);
        queue.save_checkpoint("npm", "12345").await.unwrap();
        queue.save_checkpoint("npm", "12399").await.unwrap();
        assert_eq!(
            queue.load_checkpoint("npm").await.unwrap().as_deref(),
            Some("12399")
        );
        assert_eq!(queue.load_checkpoint("pypi").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_or_stop_returns_on_stop() {
        let queue = queue();
        let (tx, mut rx) = watch::channel(false);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .dequeue_or_stop(Duration::from_secs(3600), &mut rx)
                    .await
            })
        };
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let started = Instant::now();
        let job = consumer.await.unwrap().unwrap();
        assert!(job.is_none());
        assert!(started.elapsed() < Duration::from_secs(3600));
    }
}
