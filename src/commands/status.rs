//! Queue status command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_queue::QueueDepth;

use crate::output::{self, OutputFormat};

/// One job currently held by a worker.
#[derive(Debug, Serialize, Tabled)]
pub struct ProcessingRow {
    /// Job identifier
    #[tabled(rename = "Job ID")]
    pub job_id: String,
    /// Dequeue time
    #[tabled(rename = "Dequeued At")]
    pub dequeued_at: DateTime<Utc>,
    /// Seconds since dequeue
    #[tabled(rename = "Age (s)")]
    pub age_seconds: i64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    depth: QueueDepth,
    pending: u64,
    processing: Vec<ProcessingRow>,
}

/// Print queue depth and in-flight jobs
pub async fn execute(config: &AppConfig, format: OutputFormat) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;
    let depth = queue.queue_depth().await?;
    let now = Utc::now();

    let mut processing: Vec<ProcessingRow> = queue
        .processing_entries()
        .await?
        .into_iter()
        .map(|entry| ProcessingRow {
            age_seconds: (now - entry.dequeued_at).num_seconds().max(0),
            job_id: entry.job_id,
            dequeued_at: entry.dequeued_at,
        })
        .collect();
    processing.sort_by(|a, b| b.age_seconds.cmp(&a.age_seconds));

    match format {
        OutputFormat::Json => output::print_json(&StatusReport {
            depth,
            pending: depth.pending(),
            processing,
        }),
        OutputFormat::Table => {
            println!("Queue Status ({}):", config.queue.backend);
            output::print_kv("Critical", &depth.critical.to_string());
            output::print_kv("High", &depth.high.to_string());
            output::print_kv("Normal", &depth.normal.to_string());
            output::print_kv("Delayed retries", &depth.delayed.to_string());
            output::print_kv("Processing", &depth.processing.to_string());
            output::print_kv("Dead letters", &depth.dead_letter.to_string());
            if !processing.is_empty() {
                println!();
                output::print_list(&processing, format);
            }
        }
    }
    Ok(())
}
