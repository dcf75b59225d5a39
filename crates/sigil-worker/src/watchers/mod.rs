//! Registry watchers.

pub mod clawhub;
pub mod github;
pub mod npm;
pub mod pypi;
pub mod skills;
mod xmlrpc;

use std::sync::Arc;
use std::time::Duration;

use sigil_core::config::watcher::WatchersConfig;
use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;
use sigil_queue::JobQueue;

use crate::watcher::{CheckpointStore, Watcher};

pub use clawhub::ClawhubWatcher;
pub use github::GithubWatcher;
pub use npm::NpmWatcher;
pub use pypi::PypiWatcher;
pub use skills::SkillsWatcher;

/// Every watcher name, in start order.
pub const WATCHER_NAMES: &[&str] = &[
    npm::WATCHER_NAME,
    pypi::WATCHER_NAME,
    clawhub::WATCHER_NAME,
    github::WATCHER_NAME,
    skills::WATCHER_NAME,
];

/// Build the HTTP client shared by every watcher.
pub fn http_client(config: &WatchersConfig) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_seconds))
        .user_agent(concat!("sigil-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
        })
}

/// Every enabled watcher, optionally restricted to `only` by name.
pub fn build_watchers(
    config: &WatchersConfig,
    queue: &JobQueue,
    only: &[String],
) -> AppResult<Vec<Arc<dyn Watcher>>> {
    let http = http_client(config)?;
    let wanted = |name: &str| only.is_empty() || only.iter().any(|n| n == name);

    for name in only {
        if !WATCHER_NAMES.contains(&name.as_str()) {
            return Err(AppError::validation(format!(
                "Unknown watcher: '{name}'. Supported: {}",
                WATCHER_NAMES.join(", ")
            )));
        }
    }

    let mut watchers: Vec<Arc<dyn Watcher>> = Vec::new();
    if config.npm.enabled && wanted(npm::WATCHER_NAME) {
        watchers.push(Arc::new(NpmWatcher::new(
            http.clone(),
            config.npm.clone(),
            CheckpointStore::new(queue.clone(), npm::WATCHER_NAME),
        )));
    }
    if config.pypi.enabled && wanted(pypi::WATCHER_NAME) {
        watchers.push(Arc::new(PypiWatcher::new(
            http.clone(),
            config.pypi.clone(),
            CheckpointStore::new(queue.clone(), pypi::WATCHER_NAME),
            CheckpointStore::new(queue.clone(), pypi::CHANGELOG_CHECKPOINT),
        )));
    }
    if config.clawhub.enabled && wanted(clawhub::WATCHER_NAME) {
        watchers.push(Arc::new(ClawhubWatcher::new(
            http.clone(),
            config.clawhub.clone(),
            CheckpointStore::new(queue.clone(), clawhub::WATCHER_NAME),
        )));
    }
    if config.github.enabled && wanted(github::WATCHER_NAME) {
        watchers.push(Arc::new(GithubWatcher::new(
            http.clone(),
            config.github.clone(),
        )));
    }
    if config.skills.enabled && wanted(skills::WATCHER_NAME) {
        watchers.push(Arc::new(SkillsWatcher::new(
            http,
            config.skills.clone(),
            CheckpointStore::new(queue.clone(), skills::WATCHER_NAME),
        )));
    }
    Ok(watchers)
}

/// Whether poll number `count` (starting at 1) is one of every `every`
/// polls, counting the first. `0` means never.
pub(crate) fn due_on_poll(count: u64, every: u64) -> bool {
    every > 0 && count % every == 1 % every
}

pub(crate) fn request_failed(context: &str, e: reqwest::Error) -> AppError {
    AppError::with_source(ErrorKind::ExternalService, format!("{context}: {e}"), e)
}
