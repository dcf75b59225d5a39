//! Bundled collaborator implementations.
//!
//! These shell out to the package managers and the sigil CLI and keep
//! results on the local filesystem. They are enough to run the bot on a
//! single host; deployments with a real result database supply their own
//! [`ResultStore`](crate::collaborators::ResultStore).

pub mod downloader;
pub mod log_sink;
pub mod process;
pub mod result_store;
pub mod scanner;

use std::sync::Arc;
use std::time::Duration;

use sigil_core::config::adapter::AdapterConfig;
use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;

use crate::collaborators::Collaborators;

pub use downloader::CommandDownloader;
pub use log_sink::LogSink;
pub use result_store::JsonFileResultStore;
pub use scanner::CliScanner;

/// Collaborators backed by the bundled adapters.
///
/// The scanner itself is unbounded here; the worker applies the scan
/// timeout around it.
pub fn default_collaborators(config: &AdapterConfig) -> AppResult<Collaborators> {
    let download_timeout = Duration::from_secs(config.download_timeout_seconds);
    let http = reqwest::Client::builder()
        .timeout(download_timeout)
        .user_agent(concat!("sigil-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
        })?;

    let sink = Arc::new(LogSink);
    Ok(Collaborators {
        downloader: Arc::new(CommandDownloader::new(download_timeout, http)),
        scanner: Arc::new(CliScanner::new(&config.sigil_bin)),
        store: Arc::new(JsonFileResultStore::new(&config.results_dir)),
        publisher: sink.clone(),
        intelligence: sink,
    })
}
