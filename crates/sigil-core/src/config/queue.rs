//! Queue backing-store configuration.

use serde::{Deserialize, Serialize};

/// Top-level queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backing store: `"redis"` or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Redis-specific configuration.
    #[serde(default)]
    pub redis: RedisQueueConfig,
    /// How long a worker waits inside `dequeue` for new work, in seconds.
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_seconds: u64,
    /// How often an idle `dequeue` re-checks the lanes, in milliseconds.
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis: RedisQueueConfig::default(),
            dequeue_timeout_seconds: default_dequeue_timeout(),
            wait_poll_interval_ms: default_wait_poll_interval(),
        }
    }
}

/// Redis backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisQueueConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Namespace prepended to every queue key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_backend() -> String {
    "redis".to_string()
}

fn default_dequeue_timeout() -> u64 {
    30
}

fn default_wait_poll_interval() -> u64 {
    250
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "sigil".to_string()
}
