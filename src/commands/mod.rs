//! CLI command definitions and dispatch.

pub mod backfill;
pub mod dead_letters;
pub mod enqueue;
pub mod run;
pub mod status;

use clap::{Parser, Subcommand};
use tracing::info;

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_queue::{JobQueue, RetryPolicy};

use crate::output::OutputFormat;

/// Sigil Bot: registry watchers and scanner workers
#[derive(Debug, Parser)]
#[command(name = "sigil-bot", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (default: $SIGIL_BOT_CONFIG or config/default.toml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run watchers, workers, and the rescan scheduler until stopped
    Run(run::RunArgs),
    /// Show queue depth and in-flight jobs
    Status,
    /// List dead-lettered jobs, newest first
    DeadLetters(dead_letters::DeadLettersArgs),
    /// Poll one watcher once and enqueue what it finds
    Backfill(backfill::BackfillArgs),
    /// Enqueue a single package by hand
    Enqueue(enqueue::EnqueueArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Run(args) => run::execute(args, config).await,
            Commands::Status => status::execute(&config, self.format).await,
            Commands::DeadLetters(args) => dead_letters::execute(args, &config, self.format).await,
            Commands::Backfill(args) => backfill::execute(args, &config).await,
            Commands::Enqueue(args) => enqueue::execute(args, &config).await,
        }
    }
}

/// Helper: connect the configured queue backend
pub async fn connect_queue(config: &AppConfig) -> Result<JobQueue, AppError> {
    info!(backend = %config.queue.backend, "Connecting queue");
    let store = sigil_queue::connect(&config.queue).await?;
    Ok(JobQueue::new(store, RetryPolicy::from_config(&config.worker)))
}
