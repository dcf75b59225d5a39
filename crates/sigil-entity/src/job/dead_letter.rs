//! Terminal record of a job that exhausted its retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::ScanJob;

/// Append-only dead-letter record kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The job as it was when it died.
    pub job: ScanJob,
    /// Final error text.
    pub error: String,
    /// Time of death.
    pub dead_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Create an entry stamped with the current time.
    pub fn new(job: ScanJob, error: impl Into<String>) -> Self {
        Self {
            job,
            error: error.into(),
            dead_at: Utc::now(),
        }
    }
}
