//! Scanner worker configuration.

use serde::{Deserialize, Serialize};

/// Scanner worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether workers are started by `run`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent worker loops.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound on a single scan, in seconds.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_seconds: u64,
    /// Retry budget assigned to newly created jobs.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before retry attempt N (1-based), in seconds.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_seconds: Vec<u64>,
    /// Delay for attempts beyond the table, in seconds.
    #[serde(default = "default_retry_delay_default")]
    pub retry_delay_default_seconds: u64,
    /// Pause after a queue-level failure inside a worker iteration, in seconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,
    /// How long shutdown waits before warning about in-flight work, in
    /// seconds. Must cover one download plus one scan.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Parent directory for per-job workspaces (system temp dir when unset).
    #[serde(default)]
    pub workspace_root: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            concurrency: default_concurrency(),
            scan_timeout_seconds: default_scan_timeout(),
            max_retries: default_max_retries(),
            retry_delays_seconds: default_retry_delays(),
            retry_delay_default_seconds: default_retry_delay_default(),
            error_backoff_seconds: default_error_backoff(),
            shutdown_grace_seconds: default_shutdown_grace(),
            workspace_root: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_scan_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delays() -> Vec<u64> {
    vec![60, 300, 1800]
}

fn default_retry_delay_default() -> u64 {
    1800
}

fn default_error_backoff() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    300
}
