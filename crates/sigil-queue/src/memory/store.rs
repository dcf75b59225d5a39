//! In-process queue store for tests and single-process development.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};

use sigil_core::result::AppResult;
use sigil_entity::job::{DeadLetterEntry, Lane, ScanJob};

use crate::store::{ProcessingEntry, QueueDepth, QueueStore};

/// Queue structures guarded by one lock so each operation is atomic.
#[derive(Debug, Default)]
struct QueueState {
    lanes: HashMap<Lane, VecDeque<ScanJob>>,
    processing: HashMap<String, DateTime<Utc>>,
    dedup: HashSet<String>,
    /// Parked retries, ordered by ready time on read.
    delayed: Vec<(DateTime<Utc>, ScanJob)>,
    /// Newest at the front.
    dead_letters: VecDeque<DeadLetterEntry>,
}

impl QueueState {
    fn push(&mut self, job: ScanJob) {
        self.lanes.entry(job.lane()).or_default().push_back(job);
    }

    fn lane_len(&self, lane: Lane) -> u64 {
        self.lanes.get(&lane).map_or(0, |q| q.len() as u64)
    }
}

/// Queue store with the same semantics as the Redis backend, held in
/// process memory.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<QueueState>,
    checkpoints: DashMap<String, String>,
    arrivals: Notify,
}

impl MemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, job: &ScanJob) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if !state.dedup.insert(job.dedup_key()) {
            return Ok(false);
        }
        state.push(job.clone());
        drop(state);
        self.arrivals.notify_one();
        Ok(true)
    }

    async fn pop(&self, now: DateTime<Utc>) -> AppResult<Option<ScanJob>> {
        let mut state = self.state.lock().await;
        for lane in Lane::ALL {
            let job = state.lanes.get_mut(&lane).and_then(VecDeque::pop_front);
            if let Some(job) = job {
                state.processing.insert(job.id.clone(), now);
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn wait_for_arrival(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.arrivals.notified()).await;
    }

    async fn complete(&self, job: &ScanJob) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.processing.remove(&job.id);
        state.dedup.remove(&job.dedup_key());
        Ok(())
    }

    async fn schedule_retry(&self, job: &ScanJob, ready_at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.processing.remove(&job.id);
        state.delayed.push((ready_at, job.clone()));
        Ok(())
    }

    async fn dead_letter(&self, entry: &DeadLetterEntry) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.processing.remove(&entry.job.id);
        state.dedup.remove(&entry.job.dedup_key());
        state.dead_letters.push_front(entry.clone());
        Ok(())
    }

    async fn promote_ready(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let (mut ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = waiting;

        ready.sort_by_key(|(ready_at, _)| *ready_at);
        let moved = ready.len();
        for (_, job) in ready {
            state.push(job);
        }
        drop(state);

        for _ in 0..moved {
            self.arrivals.notify_one();
        }
        Ok(moved as u64)
    }

    async fn set_checkpoint(&self, watcher: &str, value: &str) -> AppResult<()> {
        self.checkpoints
            .insert(watcher.to_string(), value.to_string());
        Ok(())
    }

    async fn get_checkpoint(&self, watcher: &str) -> AppResult<Option<String>> {
        Ok(self.checkpoints.get(watcher).map(|v| v.value().clone()))
    }

    async fn depth(&self) -> AppResult<QueueDepth> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            critical: state.lane_len(Lane::Critical),
            high: state.lane_len(Lane::High),
            normal: state.lane_len(Lane::Normal),
            processing: state.processing.len() as u64,
            dead_letter: state.dead_letters.len() as u64,
            delayed: state.delayed.len() as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry>> {
        let state = self.state.lock().await;
        Ok(state.dead_letters.iter().take(limit).cloned().collect())
    }

    async fn processing_entries(&self) -> AppResult<Vec<ProcessingEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<ProcessingEntry> = state
            .processing
            .iter()
            .map(|(job_id, at)| ProcessingEntry {
                job_id: job_id.clone(),
                dequeued_at: *at,
            })
            .collect();
        entries.sort_by_key(|e| e.dequeued_at);
        Ok(entries)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
