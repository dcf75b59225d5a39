//! PyPI watcher following the XML-RPC changelog serial, plus the
//! new-packages and updates RSS feeds on a slower cadence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use sigil_core::config::watcher::PypiWatcherConfig;
use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{JobMetadata, ScanJob};

use super::{due_on_poll, request_failed, xmlrpc};
use crate::filters::{determine_priority, matches_ai_keywords};
use crate::watcher::{CheckpointStore, Watcher};

/// Watcher name and RSS checkpoint key.
pub const WATCHER_NAME: &str = "pypi";

/// Checkpoint key holding the last processed changelog serial.
pub const CHANGELOG_CHECKPOINT: &str = "pypi:changelog";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<FeedItem>,
}

/// One `<item>` of a PyPI feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct FeedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "pubDate", default)]
    pub pub_date: Option<String>,
}

impl FeedItem {
    /// `"name 1.2.3"` split on the last space. The updates feed carries a
    /// version; the new-packages feed sometimes does not.
    pub fn name_and_version(&self) -> (&str, &str) {
        let title = self.title.trim();
        match title.rsplit_once(' ') {
            Some((name, version)) => (name.trim(), version.trim()),
            None => (title, ""),
        }
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.pub_date.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// `info` block of the JSON API response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PackageInfo {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub downloads: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PackageDocument {
    #[serde(default)]
    info: PackageInfo,
}

impl PackageInfo {
    fn keywords(&self) -> Vec<String> {
        self.keywords
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// PyPI has reported `-1` here since download stats moved elsewhere.
    fn weekly_downloads(&self) -> u64 {
        self.downloads
            .as_ref()
            .and_then(|d| d.get("last_week"))
            .and_then(Value::as_i64)
            .map_or(0, |n| u64::try_from(n).unwrap_or(0))
    }
}

/// Parse an RSS document into its items.
pub(crate) fn parse_feed(xml: &str) -> AppResult<Vec<FeedItem>> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| {
        AppError::with_source(ErrorKind::Serialization, "Invalid PyPI RSS document", e)
    })?;
    Ok(rss.channel.items)
}

/// One `(name, version, timestamp, action, serial)` changelog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangelogEntry {
    pub name: String,
    pub version: String,
    pub action: String,
    pub serial: i64,
}

impl ChangelogEntry {
    /// Rows shorter than four fields are dropped.
    fn from_row(row: &Value) -> Option<Self> {
        let fields = row.as_array().filter(|f| f.len() >= 4)?;
        let text = |v: &Value| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Some(Self {
            name: text(&fields[0]),
            version: text(&fields[1]),
            action: text(&fields[3]),
            serial: fields.get(4).and_then(Value::as_i64).unwrap_or(0),
        })
    }

    /// Only uploads of new releases or projects are interesting.
    fn is_release(&self) -> bool {
        let action = self.action.to_lowercase();
        action.contains("new") || action.contains("create")
    }
}

/// Decode a `changelog_since_serial` result.
pub(crate) fn parse_changelog(value: &Value) -> Vec<ChangelogEntry> {
    value
        .as_array()
        .map(|rows| rows.iter().filter_map(ChangelogEntry::from_row).collect())
        .unwrap_or_default()
}

/// Reads the PyPI changelog on every poll and the RSS feeds on every
/// `rss_every_polls`-th poll. The changelog checkpoint is the last serial
/// seen; the RSS checkpoint is the newest `pubDate`.
#[derive(Debug)]
pub struct PypiWatcher {
    http: reqwest::Client,
    config: PypiWatcherConfig,
    checkpoints: CheckpointStore,
    changelog_checkpoint: CheckpointStore,
    polls: AtomicU64,
}

impl PypiWatcher {
    /// Create the watcher.
    pub fn new(
        http: reqwest::Client,
        config: PypiWatcherConfig,
        checkpoints: CheckpointStore,
        changelog_checkpoint: CheckpointStore,
    ) -> Self {
        Self {
            http,
            config,
            checkpoints,
            changelog_checkpoint,
            polls: AtomicU64::new(0),
        }
    }

    async fn call(&self, method: &str, params: &[i64]) -> AppResult<Value> {
        let body = self
            .http
            .post(&self.config.xmlrpc_url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(xmlrpc::method_call(method, params))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("PyPI XML-RPC request failed", e))?
            .text()
            .await
            .map_err(|e| request_failed("PyPI XML-RPC read failed", e))?;
        xmlrpc::parse_response(&body)
    }

    /// New releases since the saved serial. The first run records the
    /// current serial without backfilling.
    async fn poll_changelog(&self) -> AppResult<Vec<ScanJob>> {
        let saved = self.changelog_checkpoint.load().await?;
        let Some(serial) = saved.as_deref().and_then(|s| s.trim().parse::<i64>().ok()) else {
            let current = self
                .call("changelog_last_serial", &[])
                .await?
                .as_i64()
                .ok_or_else(|| AppError::external("PyPI returned a non-integer serial"))?;
            self.changelog_checkpoint.save(&current.to_string()).await?;
            info!(watcher = WATCHER_NAME, serial = current, "Initial changelog serial recorded");
            return Ok(Vec::new());
        };

        let entries = parse_changelog(&self.call("changelog_since_serial", &[serial]).await?);
        let (releases, newest) = select_changelog_releases(&entries, serial);
        let jobs: Vec<ScanJob> = releases.into_iter().map(job_from_changelog).collect();

        if newest > serial {
            self.changelog_checkpoint.save(&newest.to_string()).await?;
        }
        debug!(
            watcher = WATCHER_NAME,
            changes = entries.len(),
            in_scope = jobs.len(),
            serial = newest,
            "PyPI changelog processed"
        );
        Ok(jobs)
    }

    async fn fetch_feed(&self, url: &str) -> AppResult<Vec<FeedItem>> {
        let body = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("PyPI feed request failed", e))?
            .text()
            .await
            .map_err(|e| request_failed("PyPI feed read failed", e))?;
        parse_feed(&body)
    }

    /// JSON API metadata; empty on any failure.
    async fn package_info(&self, name: &str) -> PackageInfo {
        let url = format!(
            "{}/{}/json",
            self.config.json_api_url.trim_end_matches('/'),
            name
        );
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp
                .json::<PackageDocument>()
                .await
                .map(|doc| doc.info)
                .unwrap_or_default(),
            Ok(resp) => {
                debug!(package = %name, status = %resp.status(), "PyPI metadata unavailable");
                PackageInfo::default()
            }
            Err(e) => {
                debug!(package = %name, error = %e, "PyPI metadata request failed");
                PackageInfo::default()
            }
        }
    }

    async fn load_since(&self) -> AppResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.checkpoints.load().await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                debug!(watcher = WATCHER_NAME, checkpoint = %raw, error = %e, "Ignoring unreadable checkpoint");
                Ok(None)
            }
        }
    }

    async fn poll_rss(&self) -> AppResult<Vec<ScanJob>> {
        let since = self.load_since().await?;

        let mut items = Vec::new();
        let mut failures = 0;
        for feed in &self.config.feeds {
            match self.fetch_feed(feed).await {
                Ok(feed_items) => items.extend(feed_items),
                Err(e) => {
                    failures += 1;
                    error!(watcher = WATCHER_NAME, feed = %feed, error = %e, "PyPI feed poll failed");
                }
            }
        }
        if failures > 0 && failures == self.config.feeds.len() {
            return Err(AppError::external("Every PyPI feed failed"));
        }

        let (fresh, newest) = select_new_items(&items, since);
        let mut jobs = Vec::new();
        for item in fresh {
            let (name, _) = item.name_and_version();
            let info = self.package_info(name).await;
            if let Some(job) = job_from_item(item, &info) {
                jobs.push(job);
            }
        }

        if let Some(newest) = newest.filter(|n| since.is_none_or(|s| *n > s)) {
            self.checkpoints.save(&newest.to_rfc3339()).await?;
        }

        debug!(
            watcher = WATCHER_NAME,
            items = items.len(),
            in_scope = jobs.len(),
            "PyPI feeds processed"
        );
        Ok(jobs)
    }
}

#[async_trait]
impl Watcher for PypiWatcher {
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        let count = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        let changelog = self.poll_changelog().await;
        if !due_on_poll(count, self.config.rss_every_polls) {
            return changelog;
        }

        let mut jobs = match changelog {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(watcher = WATCHER_NAME, error = %e, "PyPI changelog poll failed");
                Vec::new()
            }
        };
        jobs.extend(self.poll_rss().await?);
        Ok(jobs)
    }
}

/// Release rows, one per name and version, whose name alone matches the
/// AI keywords; plus the highest serial seen, never below `since`.
pub(crate) fn select_changelog_releases(
    entries: &[ChangelogEntry],
    since: i64,
) -> (Vec<&ChangelogEntry>, i64) {
    let mut seen = HashSet::new();
    let mut newest = since;
    let mut releases = Vec::new();
    for entry in entries {
        newest = newest.max(entry.serial);
        if entry.name.is_empty() || !entry.is_release() {
            continue;
        }
        if !seen.insert((entry.name.as_str(), entry.version.as_str())) {
            continue;
        }
        if matches_ai_keywords(&entry.name, "", &[]) {
            releases.push(entry);
        }
    }
    (releases, newest)
}

pub(crate) fn job_from_changelog(entry: &ChangelogEntry) -> ScanJob {
    let metadata = JobMetadata::new()
        .with(keys::SOURCE, "changelog")
        .with("action", entry.action.as_str());
    ScanJob::new(WATCHER_NAME, &entry.name, &entry.version)
        .with_priority(determine_priority(WATCHER_NAME, &entry.name, 0))
        .with_metadata(metadata)
}

/// Items published after `since` (all of them when there is no
/// checkpoint), one per name and version, plus the newest date seen.
pub(crate) fn select_new_items(
    items: &[FeedItem],
    since: Option<DateTime<Utc>>,
) -> (Vec<&FeedItem>, Option<DateTime<Utc>>) {
    let mut seen = HashSet::new();
    let mut fresh = Vec::new();
    let mut newest: Option<DateTime<Utc>> = None;

    for item in items {
        let published = item.published_at();
        if let Some(p) = published {
            newest = Some(newest.map_or(p, |n| n.max(p)));
        }

        let is_new = match (since, published) {
            (None, _) => true,
            (Some(s), Some(p)) => p > s,
            (Some(_), None) => false,
        };
        if !is_new {
            continue;
        }

        let (name, version) = item.name_and_version();
        if name.is_empty() || !seen.insert((name.to_string(), version.to_string())) {
            continue;
        }
        fresh.push(item);
    }

    (fresh, newest)
}

/// Build a job when the item is in scope.
pub(crate) fn job_from_item(item: &FeedItem, info: &PackageInfo) -> Option<ScanJob> {
    let (name, version) = item.name_and_version();
    let description = info
        .summary
        .as_deref()
        .or(item.description.as_deref())
        .unwrap_or("");
    let keywords = info.keywords();
    if !matches_ai_keywords(name, description, &keywords) {
        return None;
    }

    let downloads = info.weekly_downloads();
    let metadata = JobMetadata::new()
        .with(keys::AUTHOR, info.author.clone().unwrap_or_default())
        .with(keys::DESCRIPTION, description)
        .with(keys::KEYWORDS, keywords)
        .with(keys::WEEKLY_DOWNLOADS, downloads)
        .with("published_at", item.pub_date.clone().unwrap_or_default())
        .with(keys::SOURCE, "rss");

    Some(
        ScanJob::new(WATCHER_NAME, name, version)
            .with_priority(determine_priority(WATCHER_NAME, name, downloads))
            .with_metadata(metadata),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>PyPI recent updates</title>
    <link>https://pypi.org/</link>
    <description>Recent updates to the Python Package Index</description>
    <item>
      <title>langchain-tools 0.3.1</title>
      <link>https://pypi.org/project/langchain-tools/0.3.1/</link>
      <description>Tools for LangChain agents</description>
      <pubDate>Sun, 18 Oct 2026 10:05:00 GMT</pubDate>
    </item>
    <item>
      <title>left-pad 1.0.0</title>
      <link>https://pypi.org/project/left-pad/1.0.0/</link>
      <description>String padding</description>
      <pubDate>Sun, 18 Oct 2026 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>langchain-tools 0.3.1</title>
      <link>https://pypi.org/project/langchain-tools/0.3.1/</link>
      <pubDate>Sun, 18 Oct 2026 09:55:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].name_and_version(), ("langchain-tools", "0.3.1"));
        assert_eq!(items[0].published_at(), Some(at("2026-10-18T10:05:00Z")));
        assert!(parse_feed("not xml at all <").is_err());
    }

    #[test]
    fn test_title_without_version() {
        let item = FeedItem {
            title: "agent-kit".to_string(),
            ..FeedItem::default()
        };
        assert_eq!(item.name_and_version(), ("agent-kit", ""));
    }

    #[test]
    fn test_first_poll_takes_everything_once() {
        let items = parse_feed(FEED).unwrap();
        let (fresh, newest) = select_new_items(&items, None);
        assert_eq!(fresh.len(), 2);
        assert_eq!(newest, Some(at("2026-10-18T10:05:00Z")));
    }

    #[test]
    fn test_checkpoint_filters_older_items() {
        let items = parse_feed(FEED).unwrap();
        let (fresh, _) = select_new_items(&items, Some(at("2026-10-18T10:00:00Z")));
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].name_and_version().0, "langchain-tools");

        let (fresh, _) = select_new_items(&items, Some(at("2026-10-18T10:05:00Z")));
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_job_from_item_filters_and_enriches() {
        let items = parse_feed(FEED).unwrap();
        let info: PackageInfo = serde_json::from_value(json!({
            "summary": "LangChain helpers",
            "keywords": "agents, tools",
            "author": "carol",
            "downloads": {"last_week": 5000}
        }))
        .unwrap();

        let job = job_from_item(&items[0], &info).unwrap();
        assert_eq!(job.ecosystem, "pypi");
        assert_eq!(job.version, "0.3.1");
        assert_eq!(job.priority, "high");
        assert_eq!(job.metadata.get_str(keys::SOURCE), Some("rss"));
        assert_eq!(job.metadata.weekly_downloads(), 5000);
        assert_eq!(job.metadata.get(keys::KEYWORDS), Some(&json!(["agents", "tools"])));

        assert!(job_from_item(&items[1], &PackageInfo::default()).is_none());
    }

    #[test]
    fn test_negative_download_counts_read_as_zero() {
        let info: PackageInfo =
            serde_json::from_value(json!({"downloads": {"last_week": -1}})).unwrap();
        assert_eq!(info.weekly_downloads(), 0);
    }

    fn changelog() -> Vec<ChangelogEntry> {
        parse_changelog(&json!([
            ["mcp-bridge", "0.1.0", 1792310400, "new release", 205],
            ["mcp-bridge", "0.1.0", 1792310401, "add py3 file mcp_bridge-0.1.0.whl", 206],
            ["mcp-bridge", "0.1.0", 1792310402, "new release", 207],
            ["left-pad", "1.0.0", 1792310403, "new release", 208],
            ["agent-kit", null, 1792310404, "create", 209],
            ["short"],
            ["langchain-x", "2.0", 1792310405, "remove release", 204]
        ]))
    }

    #[test]
    fn test_parse_changelog_rows() {
        let entries = changelog();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[4].version, "");
        assert_eq!(entries[4].serial, 209);
        assert!(parse_changelog(&json!("unexpected")).is_empty());
    }

    #[test]
    fn test_changelog_keeps_new_in_scope_releases_once() {
        let entries = changelog();
        let (releases, newest) = select_changelog_releases(&entries, 200);
        let names: Vec<_> = releases.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["mcp-bridge", "agent-kit"]);
        assert_eq!(newest, 209);

        let (_, newest) = select_changelog_releases(&[], 200);
        assert_eq!(newest, 200);
    }

    #[test]
    fn test_job_from_changelog() {
        let entries = changelog();
        let job = job_from_changelog(&entries[0]);
        assert_eq!(job.ecosystem, "pypi");
        assert_eq!((job.name.as_str(), job.version.as_str()), ("mcp-bridge", "0.1.0"));
        assert_eq!(job.metadata.get_str(keys::SOURCE), Some("changelog"));
        assert_eq!(job.metadata.get_str("action"), Some("new release"));
        assert_eq!(job.download_url, "");
    }
}
