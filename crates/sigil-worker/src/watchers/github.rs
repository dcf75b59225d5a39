//! GitHub watcher for MCP server repositories.
//!
//! Every n-th poll runs one repository search, rotating through the
//! configured queries; repositories found this way become "known". Every
//! poll then reads the public events stream and re-queues known
//! repositories that received a push.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use sigil_core::config::watcher::GithubWatcherConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{priority, JobMetadata, ScanJob};

use super::{due_on_poll, request_failed};
use crate::filters::determine_priority;
use crate::watcher::Watcher;

/// Watcher name.
pub const WATCHER_NAME: &str = "github";

const GITHUB_JSON: &str = "application/vnd.github+json";
const SEARCH_PAGE_SIZE: &str = "100";
const SEARCH_PAGE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Repository>,
}

/// Repository as returned by `/search/repositories`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Repository {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub pushed_at: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Entry of the public `/events` stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Event {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub repo: EventRepo,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct EventRepo {
    #[serde(default)]
    pub name: String,
}

/// Last seen marker per repository: `pushed_at` after a search hit, the
/// head commit after a push event.
pub(crate) type KnownRepos = DashMap<String, String>;

/// Jobs for search hits that are new or changed since they were last seen.
/// Forks nobody starred are skipped.
pub(crate) fn jobs_from_search(repos: &[Repository], known: &KnownRepos) -> Vec<ScanJob> {
    let mut jobs = Vec::new();
    for repo in repos {
        if repo.full_name.is_empty() || (repo.stargazers_count == 0 && repo.fork) {
            continue;
        }
        let pushed_at = repo.pushed_at.clone().unwrap_or_default();
        if known
            .get(&repo.full_name)
            .is_some_and(|seen| !seen.is_empty() && *seen == pushed_at)
        {
            continue;
        }
        known.insert(repo.full_name.clone(), pushed_at.clone());

        let metadata = JobMetadata::new()
            .with("stars", repo.stargazers_count)
            .with(keys::DESCRIPTION, repo.description.clone().unwrap_or_default())
            .with("language", repo.language.clone().unwrap_or_default())
            .with(
                "default_branch",
                repo.default_branch.clone().unwrap_or_else(|| "main".to_string()),
            )
            .with("pushed_at", pushed_at.as_str())
            .with(keys::SOURCE, "search");

        let version: String = pushed_at.chars().take(10).collect();
        jobs.push(
            ScanJob::new(WATCHER_NAME, repo.full_name.as_str(), version)
                .with_priority(determine_priority(WATCHER_NAME, &repo.full_name, 0))
                .with_download_url(repo.clone_url.clone().unwrap_or_default())
                .with_metadata(metadata),
        );
    }
    jobs
}

/// Jobs for pushes to known repositories whose head moved.
pub(crate) fn jobs_from_events(events: &[Event], known: &KnownRepos) -> Vec<ScanJob> {
    let mut jobs = Vec::new();
    for event in events {
        if event.kind != "PushEvent" {
            continue;
        }
        let name = event.repo.name.as_str();
        let head = event
            .payload
            .get("head")
            .and_then(Value::as_str)
            .unwrap_or("");
        let Some(mut seen) = known.get_mut(name) else {
            continue;
        };
        if *seen == head {
            continue;
        }
        *seen = head.to_string();
        drop(seen);

        let metadata = JobMetadata::new()
            .with("head_sha", head)
            .with(keys::SOURCE, "push_event");
        let version: String = head.chars().take(8).collect();
        jobs.push(
            ScanJob::new(WATCHER_NAME, name, version)
                .with_priority(priority::HIGH)
                .with_download_url(format!("https://github.com/{name}.git"))
                .with_metadata(metadata),
        );
    }
    jobs
}

/// Searches GitHub for MCP servers and follows pushes to the ones found.
#[derive(Debug)]
pub struct GithubWatcher {
    http: reqwest::Client,
    config: GithubWatcherConfig,
    known: KnownRepos,
    polls: AtomicU64,
    search_index: AtomicUsize,
}

impl GithubWatcher {
    /// Create the watcher.
    pub fn new(http: reqwest::Client, config: GithubWatcherConfig) -> Self {
        Self {
            http,
            config,
            known: DashMap::new(),
            polls: AtomicU64::new(0),
            search_index: AtomicUsize::new(0),
        }
    }

    fn request(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        let request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, GITHUB_JSON);
        match self.config.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> AppResult<reqwest::Url> {
        let base = format!("{}{path}", self.config.api_url.trim_end_matches('/'));
        reqwest::Url::parse_with_params(&base, params)
            .map_err(|e| AppError::configuration(format!("Invalid GitHub API URL: {e}")))
    }

    /// One query, up to `search_pages` pages. A rate limit or a failure
    /// after the first page ends the sweep with what was collected.
    async fn search_sweep(&self) -> AppResult<Vec<ScanJob>> {
        let queries = &self.config.search_queries;
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.search_index.fetch_add(1, Ordering::Relaxed);
        let query = queries[index % queries.len()].as_str();
        info!(watcher = WATCHER_NAME, query = %query, "GitHub search sweep");

        let mut jobs = Vec::new();
        for page in 1..=self.config.search_pages {
            let page_param = page.to_string();
            let url = self.url(
                "/search/repositories",
                &[
                    ("q", query),
                    ("sort", "updated"),
                    ("order", "desc"),
                    ("per_page", SEARCH_PAGE_SIZE),
                    ("page", page_param.as_str()),
                ],
            )?;

            let response = match self.request(url).send().await {
                Ok(resp) => resp,
                Err(e) if page == 1 => return Err(request_failed("GitHub search failed", e)),
                Err(e) => {
                    error!(watcher = WATCHER_NAME, page, error = %e, "GitHub search page failed");
                    break;
                }
            };
            let status = response.status();
            if status == reqwest::StatusCode::FORBIDDEN
                || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                warn!(watcher = WATCHER_NAME, page, "GitHub rate limit hit during search");
                break;
            }
            if !status.is_success() {
                // Past the thousandth result the API answers 422.
                debug!(watcher = WATCHER_NAME, page, status = %status, "GitHub search stopped");
                break;
            }
            let results: SearchPage = match response.json().await {
                Ok(results) => results,
                Err(e) => {
                    error!(watcher = WATCHER_NAME, page, error = %e, "GitHub search decode failed");
                    break;
                }
            };
            if results.items.is_empty() {
                break;
            }
            jobs.extend(jobs_from_search(&results.items, &self.known));
            tokio::time::sleep(SEARCH_PAGE_DELAY).await;
        }
        Ok(jobs)
    }

    async fn check_events(&self) -> AppResult<Vec<ScanJob>> {
        if self.known.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url("/events", &[("per_page", SEARCH_PAGE_SIZE)])?;
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| request_failed("GitHub events request failed", e))?;
        if !response.status().is_success() {
            debug!(watcher = WATCHER_NAME, status = %response.status(), "GitHub events unavailable");
            return Ok(Vec::new());
        }
        let events: Vec<Event> = response
            .json()
            .await
            .map_err(|e| request_failed("GitHub events decode failed", e))?;
        Ok(jobs_from_events(&events, &self.known))
    }
}

#[async_trait]
impl Watcher for GithubWatcher {
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        let count = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        let mut jobs = Vec::new();
        if due_on_poll(count, self.config.search_every_polls) {
            match self.search_sweep().await {
                Ok(found) => jobs = found,
                Err(e) => error!(watcher = WATCHER_NAME, error = %e, "GitHub search sweep failed"),
            }
        }

        match self.check_events().await {
            Ok(pushed) => jobs.extend(pushed),
            Err(e) if jobs.is_empty() => return Err(e),
            Err(e) => error!(watcher = WATCHER_NAME, error = %e, "GitHub events poll failed"),
        }

        debug!(
            watcher = WATCHER_NAME,
            known = self.known.len(),
            in_scope = jobs.len(),
            "GitHub poll processed"
        );
        Ok(jobs)
    }
}
