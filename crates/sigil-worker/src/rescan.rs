//! Rescan scheduler: periodically re-enqueues previously scanned packages
//! whose last verdict has gone stale.
//!
//! | Condition                                  | Age before rescan      |
//! |--------------------------------------------|------------------------|
//! | `HIGH_RISK` or `CRITICAL_RISK` verdict     | `high_risk_days` (7)   |
//! | weekly downloads ≥ popular threshold       | `popular_days` (30)    |
//! | anything else                              | `default_days` (90)    |
//!
//! Rescans run at `low` priority so they never hold up new packages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use sigil_core::config::rescan::RescanConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{ScanJob, priority};
use sigil_entity::scan::{ScanRecord, Verdict};
use sigil_queue::JobQueue;

use crate::collaborators::ResultStore;

/// Why a stored scan is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RescanReason {
    /// High-risk or critical verdict older than `high_risk_days`.
    HighRisk,
    /// Popular package older than `popular_days`.
    Popular,
    /// Anything older than `default_days`.
    Stale,
}

/// A stored scan selected for rescanning.
#[derive(Debug, Clone)]
pub struct RescanCandidate {
    /// The stored scan.
    pub record: ScanRecord,
    /// Selection class; also the ordering key.
    pub reason: RescanReason,
}

/// Counts from one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanStats {
    /// Candidates selected.
    pub due: usize,
    /// Jobs admitted to the queue.
    pub enqueued: usize,
}

fn classify(record: &ScanRecord, now: DateTime<Utc>, config: &RescanConfig) -> Option<RescanReason> {
    if record.verdict == Verdict::Error {
        return None;
    }
    let age_days = (now - record.scanned_at).num_days();

    if record.verdict.is_high_risk() && age_days >= config.high_risk_days {
        return Some(RescanReason::HighRisk);
    }
    if record.metadata.weekly_downloads() >= config.popular_download_threshold
        && age_days >= config.popular_days
    {
        return Some(RescanReason::Popular);
    }
    (age_days >= config.default_days).then_some(RescanReason::Stale)
}

/// Pick due records: high-risk first, then popular, then stale; oldest
/// first within a class; at most `batch_size`.
pub fn select_candidates(
    records: Vec<ScanRecord>,
    now: DateTime<Utc>,
    config: &RescanConfig,
) -> Vec<RescanCandidate> {
    let mut candidates: Vec<RescanCandidate> = records
        .into_iter()
        .filter_map(|record| {
            classify(&record, now, config).map(|reason| RescanCandidate { record, reason })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.reason
            .cmp(&b.reason)
            .then(a.record.scanned_at.cmp(&b.record.scanned_at))
    });
    candidates.truncate(config.batch_size);
    candidates
}

/// Where to fetch the artifact again.
pub fn derive_download_url(record: &ScanRecord) -> String {
    if let Some(url) = record
        .metadata
        .get_str(keys::REPOSITORY_URL)
        .filter(|u| !u.is_empty())
    {
        return url.to_string();
    }
    match record.ecosystem.as_str() {
        "github" => format!("https://github.com/{}.git", record.name),
        "skills" => {
            let source = record
                .metadata
                .get_str(keys::SOURCE)
                .filter(|s| !s.is_empty())
                .unwrap_or(&record.name);
            format!("https://github.com/{source}.git")
        }
        "clawhub" => record
            .metadata
            .get_str("scanned_from")
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Build the low-priority rescan job for a stored scan.
pub fn rescan_job(record: &ScanRecord) -> ScanJob {
    let mut metadata = record.metadata.clone();
    metadata.insert(keys::RESCAN, true);
    metadata.insert(keys::PREVIOUS_VERDICT, record.verdict.as_str());

    ScanJob::new(&record.ecosystem, &record.name, &record.version)
        .with_priority(priority::LOW)
        .with_download_url(derive_download_url(record))
        .with_metadata(metadata)
}

/// Periodic loop that feeds stale scans back into the queue.
#[derive(Debug)]
pub struct RescanScheduler {
    queue: JobQueue,
    store: Arc<dyn ResultStore>,
    config: RescanConfig,
    max_retries: u32,
}

impl RescanScheduler {
    /// Create the scheduler.
    pub fn new(
        queue: JobQueue,
        store: Arc<dyn ResultStore>,
        config: RescanConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            max_retries,
        }
    }

    /// One scheduling pass at the current time.
    pub async fn run_once(&self) -> AppResult<RescanStats> {
        self.run_at(Utc::now()).await
    }

    /// One scheduling pass as of `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> AppResult<RescanStats> {
        let youngest = self
            .config
            .high_risk_days
            .min(self.config.popular_days)
            .min(self.config.default_days);
        let cutoff = chrono::Duration::try_days(youngest)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                AppError::configuration(format!("Rescan age of {youngest} days is out of range"))
            })?;
        let records = self.store.latest_scans(cutoff).await?;

        let candidates = select_candidates(records, now, &self.config);
        let mut stats = RescanStats {
            due: candidates.len(),
            ..RescanStats::default()
        };
        if candidates.is_empty() {
            return Ok(stats);
        }
        info!(due = stats.due, "Packages due for rescan");

        for candidate in &candidates {
            let job = rescan_job(&candidate.record).with_max_retries(self.max_retries);
            if self.queue.enqueue(&job).await? {
                stats.enqueued += 1;
            }
        }

        if stats.enqueued > 0 {
            info!(enqueued = stats.enqueued, "Rescan jobs enqueued");
        }
        Ok(stats)
    }

    /// Run until the cancel signal is received.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_seconds);
        info!(interval_s = interval.as_secs(), "Rescan scheduler started");

        loop {
            if *cancel.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Rescan pass failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Rescan scheduler stopped");
    }
}
