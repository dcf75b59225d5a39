//! Rescan scheduler configuration.

use serde::{Deserialize, Serialize};

/// Age thresholds and cadence for periodic re-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescanConfig {
    /// Whether the scheduler runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between scheduling passes.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Days before a high-risk or critical result is rescanned.
    #[serde(default = "default_high_risk_days")]
    pub high_risk_days: i64,
    /// Days before a popular package is rescanned.
    #[serde(default = "default_popular_days")]
    pub popular_days: i64,
    /// Weekly downloads at which a package counts as popular.
    #[serde(default = "default_popular_threshold")]
    pub popular_download_threshold: u64,
    /// Days before any other result is rescanned.
    #[serde(default = "default_default_days")]
    pub default_days: i64,
    /// Maximum jobs enqueued per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RescanConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_seconds: default_interval(),
            high_risk_days: default_high_risk_days(),
            popular_days: default_popular_days(),
            popular_download_threshold: default_popular_threshold(),
            default_days: default_default_days(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    21600
}

fn default_high_risk_days() -> i64 {
    7
}

fn default_popular_days() -> i64 {
    30
}

fn default_popular_threshold() -> u64 {
    10_000
}

fn default_default_days() -> i64 {
    90
}

fn default_batch_size() -> usize {
    50
}
