//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field carries a serde default so that an empty
//! configuration is valid.

pub mod adapter;
pub mod logging;
pub mod queue;
pub mod rescan;
pub mod watcher;
pub mod worker;

use serde::{Deserialize, Serialize};

use self::adapter::AdapterConfig;
use self::logging::LoggingConfig;
use self::queue::QueueConfig;
use self::rescan::RescanConfig;
use self::watcher::WatchersConfig;
use self::worker::WorkerConfig;

use crate::error::AppError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SIGIL_BOT";

/// Longest accepted retry delay, in seconds (30 days).
pub const MAX_RETRY_DELAY_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted rescan age, in days.
pub const MAX_RESCAN_DAYS: i64 = 3650;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Queue backing-store settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Scanner worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Registry watcher settings.
    #[serde(default)]
    pub watchers: WatchersConfig,
    /// Rescan scheduler settings.
    #[serde(default)]
    pub rescan: RescanConfig,
    /// Default collaborator adapter settings.
    #[serde(default)]
    pub adapters: AdapterConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `SIGIL_BOT__`.
    pub fn load(base: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(base).required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml(source: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honor.
    ///
    /// A worker finishes its current job before it stops, so the shutdown
    /// grace must cover one full download plus one full scan.
    pub fn validate(&self) -> Result<(), AppError> {
        let job_budget = self
            .adapters
            .download_timeout_seconds
            .saturating_add(self.worker.scan_timeout_seconds);
        if self.worker.shutdown_grace_seconds < job_budget {
            return Err(AppError::configuration(format!(
                "worker.shutdown_grace_seconds ({}) must be at least \
                 adapters.download_timeout_seconds + worker.scan_timeout_seconds ({job_budget})",
                self.worker.shutdown_grace_seconds
            )));
        }

        let delays = self
            .worker
            .retry_delays_seconds
            .iter()
            .chain(std::iter::once(&self.worker.retry_delay_default_seconds));
        if let Some(delay) = delays.into_iter().find(|d| **d > MAX_RETRY_DELAY_SECONDS) {
            return Err(AppError::configuration(format!(
                "Retry delay of {delay}s exceeds the {MAX_RETRY_DELAY_SECONDS}s limit"
            )));
        }

        for (name, days) in [
            ("high_risk_days", self.rescan.high_risk_days),
            ("popular_days", self.rescan.popular_days),
            ("default_days", self.rescan.default_days),
        ] {
            if !(0..=MAX_RESCAN_DAYS).contains(&days) {
                return Err(AppError::configuration(format!(
                    "rescan.{name} must be between 0 and {MAX_RESCAN_DAYS}, got {days}"
                )));
            }
        }
        Ok(())
    }
}
