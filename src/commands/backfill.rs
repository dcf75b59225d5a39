//! One-shot watcher poll.

use clap::Args;

use sigil_core::config::AppConfig;
use sigil_core::error::AppError;
use sigil_worker::WatcherRunner;
use sigil_worker::watchers::build_watchers;

use crate::output;

/// Arguments for the backfill command
#[derive(Debug, Args)]
pub struct BackfillArgs {
    /// Watcher to poll (npm, pypi, clawhub, github, or skills)
    pub watcher: String,
}

/// Poll the named watcher once and enqueue its jobs
pub async fn execute(args: &BackfillArgs, config: &AppConfig) -> Result<(), AppError> {
    let queue = super::connect_queue(config).await?;
    let watchers = build_watchers(&config.watchers, &queue, std::slice::from_ref(&args.watcher))?;
    let Some(watcher) = watchers.into_iter().next() else {
        return Err(AppError::validation(format!(
            "Watcher '{}' is disabled in configuration",
            args.watcher
        )));
    };

    let runner = WatcherRunner::new(watcher, queue, config.worker.max_retries);
    let stats = runner.poll_once().await?;

    output::print_success(&format!("Backfill from '{}' complete", runner.name()));
    output::print_kv("Found", &stats.new.to_string());
    output::print_kv("Enqueued", &stats.enqueued.to_string());
    output::print_kv("Duplicates", &stats.duplicates.to_string());
    Ok(())
}
