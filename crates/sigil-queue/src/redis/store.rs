//! Redis queue store implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::error;

use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;
use sigil_entity::job::{DeadLetterEntry, Lane, ScanJob};

use super::client::RedisClient;
use super::scripts::{
    COMPLETE_SCRIPT, DEAD_LETTER_SCRIPT, ENQUEUE_SCRIPT, POP_SCRIPT, PROMOTE_SCRIPT, RETRY_SCRIPT,
    retry_member,
};
use crate::store::{ProcessingEntry, QueueDepth, QueueStore};

/// Redis-backed queue store shared by every process.
#[derive(Debug, Clone)]
pub struct RedisQueueStore {
    /// Redis client.
    client: RedisClient,
    /// Sleep between pops while a dequeue is waiting.
    poll_interval: Duration,
}

impl RedisQueueStore {
    /// Create a new Redis queue store.
    pub fn new(client: RedisClient, wait_poll_interval_ms: u64) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(wait_poll_interval_ms.max(1)),
        }
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Queue, format!("Redis error: {e}"), e)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, job: &ScanJob) -> AppResult<bool> {
        let keys = self.client.keys();
        let payload = job.to_json()?;
        let mut conn = self.client.conn_mut();

        let claimed: i64 = redis::Script::new(ENQUEUE_SCRIPT)
            .key(keys.dedup())
            .key(keys.lane(job.lane()))
            .arg(job.dedup_key())
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(claimed == 1)
    }

    async fn pop(&self, now: DateTime<Utc>) -> AppResult<Option<ScanJob>> {
        let keys = self.client.keys();
        let [critical, high, normal] = keys.lanes();
        let mut conn = self.client.conn_mut();

        let raw: Option<String> = redis::Script::new(POP_SCRIPT)
            .key(critical)
            .key(high)
            .key(normal)
            .key(keys.processing())
            .arg(now.timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        match raw {
            Some(raw) => ScanJob::from_json(&raw).map(Some).map_err(|e| {
                error!(error = %e, payload = %raw, "Discarding undecodable queue payload");
                e
            }),
            None => Ok(None),
        }
    }

    async fn wait_for_arrival(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait.min(self.poll_interval)).await;
    }

    async fn complete(&self, job: &ScanJob) -> AppResult<()> {
        let keys = self.client.keys();
        let mut conn = self.client.conn_mut();

        let _: i64 = redis::Script::new(COMPLETE_SCRIPT)
            .key(keys.processing())
            .key(keys.dedup())
            .arg(&job.id)
            .arg(job.dedup_key())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn schedule_retry(&self, job: &ScanJob, ready_at: DateTime<Utc>) -> AppResult<()> {
        let keys = self.client.keys();
        let payload = job.to_json()?;
        let mut conn = self.client.conn_mut();

        let _: i64 = redis::Script::new(RETRY_SCRIPT)
            .key(keys.processing())
            .key(keys.retry())
            .arg(&job.id)
            .arg(ready_at.timestamp())
            .arg(retry_member(job.lane(), &payload))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn dead_letter(&self, entry: &DeadLetterEntry) -> AppResult<()> {
        let keys = self.client.keys();
        let payload = serde_json::to_string(entry)?;
        let mut conn = self.client.conn_mut();

        let _: i64 = redis::Script::new(DEAD_LETTER_SCRIPT)
            .key(keys.processing())
            .key(keys.dead_letter())
            .key(keys.dedup())
            .arg(&entry.job.id)
            .arg(payload)
            .arg(entry.job.dedup_key())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn promote_ready(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let keys = self.client.keys();
        let script = redis::Script::new(PROMOTE_SCRIPT);
        let mut invocation = script.key(keys.retry());
        invocation.arg(now.timestamp());
        for lane in Lane::ALL {
            invocation.key(keys.lane(lane)).arg(lane.as_str());
        }
        let mut conn = self.client.conn_mut();

        let moved: u64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(moved)
    }

    async fn set_checkpoint(&self, watcher: &str, value: &str) -> AppResult<()> {
        let key = self.client.keys().checkpoint(watcher);
        let mut conn = self.client.conn_mut();
        let _: () = conn.set(&key, value).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn get_checkpoint(&self, watcher: &str) -> AppResult<Option<String>> {
        let key = self.client.keys().checkpoint(watcher);
        let mut conn = self.client.conn_mut();
        let value: Option<String> = conn.get(&key).await.map_err(Self::map_err)?;
        Ok(value)
    }

    async fn depth(&self) -> AppResult<QueueDepth> {
        let keys = self.client.keys();
        let [critical, high, normal] = keys.lanes();
        let mut conn = self.client.conn_mut();

        let (critical, high, normal, processing, dead_letter, delayed): (
            u64,
            u64,
            u64,
            u64,
            u64,
            u64,
        ) = redis::pipe()
            .atomic()
            .llen(critical)
            .llen(high)
            .llen(normal)
            .hlen(keys.processing())
            .llen(keys.dead_letter())
            .zcard(keys.retry())
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(QueueDepth {
            critical,
            high,
            normal,
            processing,
            dead_letter,
            delayed,
        })
    }

    async fn dead_letters(&self, limit: usize) -> AppResult<Vec<DeadLetterEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.client.keys().dead_letter();
        let mut conn = self.client.conn_mut();
        let raw: Vec<String> = conn
            .lrange(&key, 0, limit as isize - 1)
            .await
            .map_err(Self::map_err)?;

        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(AppError::from))
            .collect()
    }

    async fn processing_entries(&self) -> AppResult<Vec<ProcessingEntry>> {
        let key = self.client.keys().processing();
        let mut conn = self.client.conn_mut();
        let raw: HashMap<String, i64> = conn.hgetall(&key).await.map_err(Self::map_err)?;

        let mut entries: Vec<ProcessingEntry> = raw
            .into_iter()
            .map(|(job_id, secs)| ProcessingEntry {
                job_id,
                dequeued_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            })
            .collect();
        entries.sort_by_key(|e| e.dequeued_at);
        Ok(entries)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
