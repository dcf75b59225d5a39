//! Scan job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sigil_core::error::AppError;
use sigil_core::result::AppResult;

use super::lane::{Lane, priority};
use super::metadata::JobMetadata;

/// Retry budget used when a producer does not specify one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One unit of scan work: a specific version of a package or skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    /// Unique job identifier.
    #[serde(default = "new_job_id")]
    pub id: String,
    /// Source registry (`npm`, `pypi`, `github`, `clawhub`, `skills`, ...).
    #[serde(default)]
    pub ecosystem: String,
    /// Package or skill name as the registry spells it.
    #[serde(default)]
    pub name: String,
    /// Version string; may be empty when the registry has none.
    #[serde(default)]
    pub version: String,
    /// Direct download location; empty when the downloader derives it.
    #[serde(default)]
    pub download_url: String,
    /// Open-ended metadata bag.
    #[serde(default)]
    pub metadata: JobMetadata,
    /// Priority string; see [`Lane::for_priority`].
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Set on first enqueue and carried unchanged through retries.
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
    /// Number of retries already scheduled.
    #[serde(default)]
    pub retries: u32,
    /// Retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ScanJob {
    /// Create a new normal-priority job with a fresh identifier.
    pub fn new(
        ecosystem: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: new_job_id(),
            ecosystem: ecosystem.into(),
            name: name.into(),
            version: version.into(),
            download_url: String::new(),
            metadata: JobMetadata::new(),
            priority: default_priority(),
            enqueued_at: None,
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the priority string.
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the download URL.
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = url.into();
        self
    }

    /// Replace the metadata bag.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Identity used to reject duplicate in-flight work:
    /// `ecosystem:name:version:content_hash`.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.ecosystem,
            self.name,
            self.version,
            self.metadata.content_hash()
        )
    }

    /// Lane this job is served from.
    pub fn lane(&self) -> Lane {
        Lane::for_priority(&self.priority)
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Reject names that would break a package-manager fetch: empty names
    /// and names containing whitespace.
    pub fn validate_name(&self) -> AppResult<()> {
        if self.name.is_empty() {
            return Err(AppError::validation("Job name is empty"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(AppError::validation(format!(
                "Job name contains whitespace: {:?}",
                self.name
            )));
        }
        Ok(())
    }

    /// `ecosystem/name@version` for log lines.
    pub fn display_name(&self) -> String {
        if self.version.is_empty() {
            format!("{}/{}", self.ecosystem, self.name)
        } else {
            format!("{}/{}@{}", self.ecosystem, self.name, self.version)
        }
    }

    /// Serialize to the wire representation stored in the queue.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire representation stored in the queue.
    pub fn from_json(data: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

fn new_job_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("scan_{}", &hex[..12])
}

fn default_priority() -> String {
    priority::NORMAL.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
