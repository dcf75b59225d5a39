//! Dead-letter listing command.

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_entity::job::DeadLetterEntry;

use crate::output::{self, OutputFormat};

/// Arguments for the dead-letters command
#[derive(Debug, Args)]
pub struct DeadLettersArgs {
    /// Maximum entries to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
}

/// One dead-lettered job.
#[derive(Debug, Serialize, Tabled)]
pub struct DeadLetterRow {
    /// Job identifier
    #[tabled(rename = "Job ID")]
    pub job_id: String,
    /// `ecosystem/name@version`
    #[tabled(rename = "Package")]
    pub package: String,
    /// Attempts used
    #[tabled(rename = "Retries")]
    pub retries: u32,
    /// Final error
    #[tabled(rename = "Error")]
    pub error: String,
    /// When it was dead-lettered
    #[tabled(rename = "Dead At")]
    pub dead_at: DateTime<Utc>,
}

impl From<&DeadLetterEntry> for DeadLetterRow {
    fn from(entry: &DeadLetterEntry) -> Self {
        Self {
            job_id: entry.job.id.clone(),
            package: entry.job.display_name(),
            retries: entry.job.retries,
            error: entry.error.chars().take(80).collect(),
            dead_at: entry.dead_at,
        }
    }
}

/// Print the newest dead-letter entries
pub async fn execute(
    args: &DeadLettersArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;
    let entries = queue.dead_letters(args.limit).await?;

    match format {
        OutputFormat::Json => output::print_json(&entries),
        OutputFormat::Table => {
            let rows: Vec<DeadLetterRow> = entries.iter().map(DeadLetterRow::from).collect();
            output::print_list(&rows, format);
        }
    }
    Ok(())
}
