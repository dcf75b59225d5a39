//! Manual enqueue command.

use clap::Args;

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_entity::job::{ScanJob, priority};

use crate::output;

/// Arguments for the enqueue command
#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Source registry (npm, pypi, github, skills, clawhub, ...)
    pub ecosystem: String,
    /// Package name
    pub name: String,
    /// Package version
    #[arg(short = 'v', long, default_value = "")]
    pub version: String,
    /// Priority: critical, high, normal, or low
    #[arg(short, long, default_value = priority::NORMAL)]
    pub priority: String,
    /// Direct download URL
    #[arg(long, default_value = "")]
    pub download_url: String,
}

/// Enqueue one job through the dedup-checked path
pub async fn execute(args: &EnqueueArgs, config: &AppConfig) -> Result<(), AppError> {
    let job = ScanJob::new(&args.ecosystem, &args.name, &args.version)
        .with_priority(&args.priority)
        .with_download_url(&args.download_url)
        .with_max_retries(config.worker.max_retries);
    job.validate_name()?;

    let queue = super::connect_queue(config).await?;
    if queue.enqueue(&job).await? {
        output::print_success(&format!(
            "Enqueued {} (id: {}, lane: {})",
            job.display_name(),
            job.id,
            job.lane()
        ));
    } else {
        output::print_warning(&format!(
            "{} is already queued or in flight",
            job.display_name()
        ));
    }
    Ok(())
}
