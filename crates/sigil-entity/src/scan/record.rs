//! Stored scan record as read back by the rescan scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::Verdict;
use crate::job::JobMetadata;

/// Most recent stored scan for a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Source registry.
    pub ecosystem: String,
    /// Package name.
    pub name: String,
    /// Scanned version.
    #[serde(default)]
    pub version: String,
    /// Verdict of that scan.
    pub verdict: Verdict,
    /// Metadata stored with the result.
    #[serde(default)]
    pub metadata: JobMetadata,
    /// When the scan completed.
    pub scanned_at: DateTime<Utc>,
}
