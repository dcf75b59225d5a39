//! ClawHub watcher walking the skill listing newest-updated first.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use sigil_core::config::watcher::ClawhubWatcherConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{JobMetadata, ScanJob};

use super::request_failed;
use crate::encoding::encode_name;
use crate::filters::determine_priority;
use crate::watcher::{CheckpointStore, Watcher};

/// Watcher name and checkpoint key.
pub const WATCHER_NAME: &str = "clawhub";

/// One page of `GET /skills?sort=updated`. Older deployments use
/// `skills` and `cursor` instead of `items` and `nextCursor`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SkillPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    skills: Vec<Value>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
    #[serde(default)]
    cursor: Option<String>,
}

impl SkillPage {
    pub fn entries(&self) -> &[Value] {
        if self.items.is_empty() {
            &self.skills
        } else {
            &self.items
        }
    }

    pub fn next(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .or(self.cursor.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// First present, non-null field among `names`.
fn field<'a>(item: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|n| item.get(*n).filter(|v| !v.is_null()))
}

fn text(item: &Value, names: &[&str]) -> String {
    match field(item, names) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj
            .get("handle")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn count(item: &Value, names: &[&str]) -> u64 {
    field(item, names).and_then(Value::as_u64).unwrap_or(0)
}

/// Archive endpoint for one skill version.
pub(crate) fn download_url(api_url: &str, slug: &str, version: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let mut url = format!("{base}/download?slug={}", encode_name(slug));
    if !version.is_empty() {
        url.push_str("&version=");
        url.push_str(&encode_name(version));
    }
    url
}

/// Jobs for the skills on one page updated after `checkpoint`, raising
/// `newest` as it goes. The flag is set once a skill at or before the
/// checkpoint is reached; everything after it is older.
pub(crate) fn scan_page(
    entries: &[Value],
    checkpoint: &str,
    newest: &mut String,
    api_url: &str,
) -> (Vec<ScanJob>, bool) {
    let mut jobs = Vec::new();
    for item in entries {
        let slug = text(item, &["slug", "name"]);
        if slug.is_empty() {
            continue;
        }
        let updated = text(item, &["updatedAt", "updated_at"]);
        if !updated.is_empty() && updated.as_str() <= checkpoint {
            return (jobs, true);
        }
        if updated > *newest {
            *newest = updated.clone();
        }

        let version = text(item, &["version", "latestVersion"]);
        let metadata = JobMetadata::new()
            .with(keys::AUTHOR, text(item, &["author", "owner"]))
            .with(keys::DESCRIPTION, text(item, &["description", "summary"]))
            .with("stars", count(item, &["stars", "starCount"]))
            .with("downloads", count(item, &["downloads", "downloadCount"]))
            .with("updated_at", updated);

        jobs.push(
            ScanJob::new(WATCHER_NAME, slug.as_str(), version.as_str())
                .with_priority(determine_priority(WATCHER_NAME, &slug, 0))
                .with_download_url(download_url(api_url, &slug, &version))
                .with_metadata(metadata),
        );
    }
    (jobs, false)
}

/// Pages through ClawHub until it reaches the saved `updatedAt`.
#[derive(Debug)]
pub struct ClawhubWatcher {
    http: reqwest::Client,
    config: ClawhubWatcherConfig,
    checkpoints: CheckpointStore,
}

impl ClawhubWatcher {
    /// Create the watcher.
    pub fn new(
        http: reqwest::Client,
        config: ClawhubWatcherConfig,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            http,
            config,
            checkpoints,
        }
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> AppResult<SkillPage> {
        let base = format!("{}/skills", self.config.api_url.trim_end_matches('/'));
        let limit = self.config.page_size.to_string();
        let mut params = vec![("limit", limit.as_str()), ("sort", "updated")];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        let url = reqwest::Url::parse_with_params(&base, &params)
            .map_err(|e| AppError::configuration(format!("Invalid ClawHub API URL: {e}")))?;

        self.http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("ClawHub listing request failed", e))?
            .json()
            .await
            .map_err(|e| request_failed("ClawHub listing decode failed", e))
    }
}

#[async_trait]
impl Watcher for ClawhubWatcher {
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        let checkpoint = self.checkpoints.load().await?.unwrap_or_default();
        let mut newest = checkpoint.clone();
        let mut jobs = Vec::new();
        let mut cursor: Option<String> = None;

        for page_no in 0..self.config.max_pages {
            let page = match self.fetch_page(cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) if page_no == 0 => return Err(e),
                Err(e) => {
                    // Older pages are unread, so the checkpoint stays put.
                    error!(watcher = WATCHER_NAME, page = page_no, error = %e, "ClawHub page failed");
                    return Ok(jobs);
                }
            };

            let (page_jobs, caught_up) =
                scan_page(page.entries(), &checkpoint, &mut newest, &self.config.api_url);
            jobs.extend(page_jobs);
            if caught_up || page.entries().is_empty() {
                break;
            }
            let Some(next) = page.next() else {
                break;
            };
            cursor = Some(next.to_string());
            tokio::time::sleep(Duration::from_millis(self.config.page_delay_ms)).await;
        }

        if newest != checkpoint {
            self.checkpoints.save(&newest).await?;
        }
        debug!(watcher = WATCHER_NAME, in_scope = jobs.len(), "ClawHub listing processed");
        Ok(jobs)
    }
}
