//! npm watcher following the registry replication `_changes` feed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use sigil_core::config::watcher::NpmWatcherConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{JobMetadata, ScanJob};

use super::request_failed;
use crate::encoding::encode_name;
use crate::filters::{determine_priority, matches_ai_keywords, matches_npm_scope};
use crate::watcher::{CheckpointStore, Watcher};

/// Watcher name and checkpoint key.
pub const WATCHER_NAME: &str = "npm";

const ABBREVIATED_METADATA: &str = "application/vnd.npm.install-v1+json";

#[derive(Debug, Deserialize)]
struct DatabaseInfo {
    #[serde(default)]
    update_seq: Option<Value>,
    #[serde(default)]
    committed_update_seq: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangesPage {
    #[serde(default)]
    pub results: Vec<Change>,
    #[serde(default)]
    pub last_seq: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Change {
    #[serde(default)]
    pub id: String,
}

/// Subset of registry package metadata the watcher reads.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PackageMeta {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<Value>,
    #[serde(default)]
    pub author: Option<Value>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, VersionMeta>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct VersionMeta {
    #[serde(default)]
    pub dist: Option<Dist>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Dist {
    #[serde(default)]
    pub tarball: Option<String>,
}

impl PackageMeta {
    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    fn keywords(&self) -> Vec<String> {
        match &self.keywords {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn author(&self) -> String {
        match &self.author {
            Some(Value::Object(obj)) => obj
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn latest(&self) -> &str {
        self.dist_tags.get("latest").map(String::as_str).unwrap_or("")
    }

    fn tarball(&self, version: &str) -> String {
        self.versions
            .get(version)
            .and_then(|v| v.dist.as_ref())
            .and_then(|d| d.tarball.clone())
            .unwrap_or_default()
    }
}

/// Follows `replicate.npmjs.com` and turns in-scope changes into jobs.
#[derive(Debug)]
pub struct NpmWatcher {
    http: reqwest::Client,
    config: NpmWatcherConfig,
    checkpoints: CheckpointStore,
}

impl NpmWatcher {
    /// Create the watcher.
    pub fn new(
        http: reqwest::Client,
        config: NpmWatcherConfig,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            http,
            config,
            checkpoints,
        }
    }

    /// Record the current sequence without backfilling.
    async fn initialize(&self) -> AppResult<()> {
        let url = format!("{}/", self.config.replicate_url.trim_end_matches('/'));
        let info: DatabaseInfo = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("npm replicate root request failed", e))?
            .json()
            .await
            .map_err(|e| request_failed("npm replicate root decode failed", e))?;

        let seq = info
            .update_seq
            .as_ref()
            .or(info.committed_update_seq.as_ref())
            .and_then(seq_to_string)
            .unwrap_or_else(|| "0".to_string());

        self.checkpoints.save(&seq).await?;
        info!(watcher = WATCHER_NAME, seq = %seq, "Initial sequence recorded");
        Ok(())
    }

    async fn changes_since(&self, since: &str) -> AppResult<ChangesPage> {
        let base = format!(
            "{}/registry/_changes",
            self.config.replicate_url.trim_end_matches('/')
        );
        let limit = self.config.batch_limit.to_string();
        let params = [("since", since), ("limit", limit.as_str())];
        let url = reqwest::Url::parse_with_params(&base, &params)
            .map_err(|e| AppError::configuration(format!("Invalid npm replicate URL: {e}")))?;

        self.http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("npm changes request failed", e))?
            .json()
            .await
            .map_err(|e| request_failed("npm changes decode failed", e))
    }

    /// Abbreviated metadata; empty on any failure.
    async fn package_meta(&self, name: &str) -> PackageMeta {
        let url = format!(
            "{}/{}",
            self.config.registry_url.trim_end_matches('/'),
            encode_name(name)
        );
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, ABBREVIATED_METADATA)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
            Ok(resp) => {
                debug!(package = %name, status = %resp.status(), "npm metadata unavailable");
                PackageMeta::default()
            }
            Err(e) => {
                debug!(package = %name, error = %e, "npm metadata request failed");
                PackageMeta::default()
            }
        }
    }
}

#[async_trait]
impl Watcher for NpmWatcher {
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        let Some(since) = self.checkpoints.load().await? else {
            self.initialize().await?;
            return Ok(Vec::new());
        };

        let page = self.changes_since(&since).await?;
        let mut jobs = Vec::new();

        for change in &page.results {
            let name = change.id.as_str();
            if name.is_empty() || name.starts_with("_design/") {
                continue;
            }

            let in_scope = matches_npm_scope(name);
            let meta = self.package_meta(name).await;
            if !in_scope && !matches_ai_keywords(name, meta.description(), &meta.keywords()) {
                continue;
            }
            jobs.push(job_from_meta(name, &meta));
        }

        let next = page.last_seq.as_ref().and_then(seq_to_string);
        if let Some(next) = next.filter(|next| *next != since) {
            self.checkpoints.save(&next).await?;
        }

        debug!(
            watcher = WATCHER_NAME,
            changes = page.results.len(),
            in_scope = jobs.len(),
            "npm changes processed"
        );
        Ok(jobs)
    }
}

/// Build a job for the latest version described by `meta`.
pub(crate) fn job_from_meta(name: &str, meta: &PackageMeta) -> ScanJob {
    let version = meta.latest().to_string();
    let tarball = if version.is_empty() {
        String::new()
    } else {
        meta.tarball(&version)
    };
    let keywords = meta.keywords();

    let metadata = JobMetadata::new()
        .with(keys::AUTHOR, meta.author())
        .with(keys::DESCRIPTION, meta.description())
        .with(keys::KEYWORDS, keywords)
        .with(keys::SOURCE, "changes_feed");

    ScanJob::new(WATCHER_NAME, name, version)
        .with_priority(determine_priority(WATCHER_NAME, name, 0))
        .with_download_url(tarball)
        .with_metadata(metadata)
}

/// CouchDB sequences are numbers on some mirrors and strings on others.
fn seq_to_string(seq: &Value) -> Option<String> {
    match seq {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_changes_page() {
        let page: ChangesPage = serde_json::from_value(json!({
            "results": [
                {"id": "@modelcontextprotocol/server-fs", "seq": 101, "changes": []},
                {"id": "_design/app", "seq": 102}
            ],
            "last_seq": 102
        }))
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(
            page.last_seq.as_ref().and_then(seq_to_string).as_deref(),
            Some("102")
        );
    }

    #[test]
    fn test_job_from_abbreviated_metadata() {
        let meta: PackageMeta = serde_json::from_value(json!({
            "name": "@modelcontextprotocol/server-fs",
            "description": "MCP filesystem server",
            "keywords": ["mcp", "filesystem"],
            "author": {"name": "Alice"},
            "dist-tags": {"latest": "1.2.0"},
            "versions": {
                "1.2.0": {"dist": {"tarball": "https://registry.npmjs.org/x/-/x-1.2.0.tgz"}}
            }
        }))
        .unwrap();

        let job = job_from_meta("@modelcontextprotocol/server-fs", &meta);
        assert_eq!(job.ecosystem, "npm");
        assert_eq!(job.version, "1.2.0");
        assert_eq!(job.priority, "high");
        assert_eq!(job.download_url, "https://registry.npmjs.org/x/-/x-1.2.0.tgz");
        assert_eq!(job.metadata.get_str(keys::AUTHOR), Some("Alice"));
        assert_eq!(job.metadata.get_str(keys::SOURCE), Some("changes_feed"));
        assert_eq!(
            job.metadata.get(keys::KEYWORDS),
            Some(&json!(["mcp", "filesystem"]))
        );
    }

    #[test]
    fn test_job_without_versions() {
        let meta = PackageMeta {
            author: Some(json!("bob")),
            keywords: Some(json!("agent, tools")),
            ..PackageMeta::default()
        };
        let job = job_from_meta("agent-tools", &meta);
        assert_eq!(job.version, "");
        assert_eq!(job.download_url, "");
        assert_eq!(job.metadata.get_str(keys::AUTHOR), Some("bob"));
        assert_eq!(meta.keywords(), vec!["agent".to_string(), "tools".to_string()]);
    }

    #[test]
    fn test_seq_formats() {
        assert_eq!(seq_to_string(&json!(42)).as_deref(), Some("42"));
        assert_eq!(seq_to_string(&json!("42-abc")).as_deref(), Some("42-abc"));
        assert_eq!(seq_to_string(&json!("")), None);
        assert_eq!(seq_to_string(&json!(null)), None);
    }
}
