//! Backing-store contract for the queue engine.
//!
//! Every mutating method is a single atomic step on the backing store.
//! Policy (timestamps, retry delays, waiting, logging) lives in
//! [`crate::engine::JobQueue`]; stores only move records between
//! structures.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sigil_core::result::AppResult;
use sigil_entity::job::{DeadLetterEntry, ScanJob};

/// Per-structure sizes for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Pending jobs in the critical lane.
    pub critical: u64,
    /// Pending jobs in the high lane.
    pub high: u64,
    /// Pending jobs in the normal lane.
    pub normal: u64,
    /// Jobs dequeued but not yet resolved.
    pub processing: u64,
    /// Dead-letter entries.
    pub dead_letter: u64,
    /// Retries waiting for their delay to elapse.
    pub delayed: u64,
}

impl QueueDepth {
    /// Pending jobs across all lanes.
    pub fn pending(&self) -> u64 {
        self.critical + self.high + self.normal
    }
}

/// One job currently held by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingEntry {
    /// Job identifier.
    pub job_id: String,
    /// When the job was dequeued.
    pub dequeued_at: DateTime<Utc>,
}

/// Atomic queue primitives implemented by each backend.
#[async_trait]
pub trait QueueStore: Send + Sync + Debug + 'static {
    /// Claim the job's dedup key and push it onto its lane.
    ///
    /// Returns `false` without mutating anything when the key is already
    /// claimed.
    async fn enqueue(&self, job: &ScanJob) -> AppResult<bool>;

    /// Pop the oldest job of the first non-empty lane and record it in the
    /// processing set at `now`.
    async fn pop(&self, now: DateTime<Utc>) -> AppResult<Option<ScanJob>>;

    /// Suspend until work may have arrived or `max_wait` elapses.
    async fn wait_for_arrival(&self, max_wait: Duration);

    /// Drop the job from the processing set and release its dedup key.
    async fn complete(&self, job: &ScanJob) -> AppResult<()>;

    /// Drop the job from the processing set and park it until `ready_at`.
    /// The dedup key stays claimed.
    async fn schedule_retry(&self, job: &ScanJob, ready_at: DateTime<Utc>) -> AppResult<()>;

    /// Drop the job from the processing set, append the entry, and release
    /// the dedup key.
    async fn dead_letter(&self, entry: &DeadLetterEntry) -> AppResult<()>;

    /// Move every parked retry whose ready time is at or before `now` back
    /// onto its lane. Returns how many moved.
    async fn promote_ready(&self, now: DateTime<Utc>) -> AppResult<u64>;

    /// Overwrite a watcher checkpoint.
    async fn set_checkpoint(&self, watcher: &str, value: &str) -> AppResult<()>;

    /// Read a watcher checkpoint.
    async fn get_checkpoint(&self, watcher: &str) -> AppResult<Option<String>>;

    /// Sizes of every structure.
    async fn depth(&self) -> AppResult<QueueDepth>;

    /// Up to `limit` dead-letter entries, newest first.
    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry>>;

    /// Every job currently in the processing set.
    async fn processing_entries(&self) -> AppResult<Vec<ProcessingEntry>>;

    /// Check backend connectivity.
    async fn health_check(&self) -> AppResult<bool>;
}
