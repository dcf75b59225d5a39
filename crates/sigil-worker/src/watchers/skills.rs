//! skills.sh watcher.
//!
//! The directory has no bulk listing, so skills are enumerated through
//! short search prefixes: all of them on the first run, a rotating batch
//! afterwards. Third-party audit results are attached to each job.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use sigil_core::config::watcher::SkillsWatcherConfig;
use sigil_core::error::AppError;
use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{JobMetadata, ScanJob};

use super::request_failed;
use crate::filters::determine_priority;
use crate::watcher::{CheckpointStore, Watcher};

/// Watcher name and checkpoint key.
pub const WATCHER_NAME: &str = "skills";

/// Known skill ids kept in the checkpoint.
const CHECKPOINT_LIMIT: usize = 10_000;

/// Skills per audit request.
const AUDIT_BATCH: usize = 10;

/// Search prefixes that together cover the directory.
pub const DISCOVERY_QUERIES: &[&str] = &[
    "ag", "ai", "an", "ap", "au", "az", "br", "bu", "cl", "co", "cr", "da", "de", "do", "en",
    "ex", "fe", "fi", "fr", "fu", "ge", "gi", "go", "gr", "he", "ho", "im", "in", "ja", "js",
    "ku", "la", "li", "lo", "ma", "me", "mi", "mo", "mu", "na", "ne", "no", "ob", "op", "pa",
    "pe", "po", "pr", "py", "re", "ro", "ru", "sc", "se", "sk", "sl", "sn", "so", "sq", "st",
    "su", "te", "th", "to", "tr", "tw", "ty", "ui", "un", "up", "va", "ve", "vi", "we", "wi",
    "wo", "azure", "react", "next", "skill", "agent", "browser", "supabase", "remotion",
    "marketing", "seo",
];

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    skills: Vec<SkillInfo>,
}

/// One search hit, e.g. id `vercel-labs/skills/find-skills` from source
/// `vercel-labs/skills`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub(crate) struct SkillInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "skillId", default)]
    pub skill_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub installs: u64,
}

impl SkillInfo {
    /// Skill name within its repository.
    pub fn slug(&self) -> &str {
        self.skill_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }
}

/// One auditor's view of a skill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProviderAssessment {
    #[serde(default = "unknown_risk")]
    pub risk: String,
    #[serde(default)]
    pub alerts: u64,
    #[serde(default)]
    pub score: Option<Value>,
    #[serde(alias = "analyzedAt", default)]
    pub analyzed_at: String,
}

fn unknown_risk() -> String {
    "unknown".to_string()
}

/// Audit response: skill name to provider to assessment.
pub(crate) type AuditResults = HashMap<String, BTreeMap<String, ProviderAssessment>>;

/// `count` queries starting at `start`, wrapping around the list.
pub(crate) fn query_batch(start: usize, count: usize) -> Vec<&'static str> {
    let len = DISCOVERY_QUERIES.len();
    (0..count.min(len))
        .map(|i| DISCOVERY_QUERIES[(start + i) % len])
        .collect()
}

/// Unseen skills with an id, first occurrence wins.
pub(crate) fn unseen<'a>(
    skills: &'a [SkillInfo],
    known: &DashSet<String>,
) -> Vec<&'a SkillInfo> {
    let mut seen = HashSet::new();
    skills
        .iter()
        .filter(|s| !s.id.is_empty() && !known.contains(&s.id))
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

/// Assessments for `skill`, matched on its slug or display name.
pub(crate) fn assessments_for(skill: &SkillInfo, audits: &AuditResults) -> Value {
    audits
        .get(skill.slug())
        .or_else(|| audits.get(&skill.name))
        .and_then(|providers| serde_json::to_value(providers).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

/// Job cloning the skill's source repository; `None` without a source.
pub(crate) fn job_from_skill(skill: &SkillInfo, assessments: Value) -> Option<ScanJob> {
    if skill.source.is_empty() {
        return None;
    }
    let metadata = JobMetadata::new()
        .with("skill_id", skill.slug())
        .with("skill_name", skill.name.as_str())
        .with(keys::SOURCE, skill.source.as_str())
        .with("installs", skill.installs)
        .with("skill_path", format!("skills/{}", skill.slug()))
        .with("provider_assessments", assessments);

    Some(
        ScanJob::new(WATCHER_NAME, skill.id.as_str(), "")
            .with_priority(determine_priority(WATCHER_NAME, &skill.id, 0))
            .with_download_url(format!("https://github.com/{}.git", skill.source))
            .with_metadata(metadata),
    )
}

/// The lexicographically last [`CHECKPOINT_LIMIT`] ids, comma-joined.
pub(crate) fn checkpoint_value(known: &DashSet<String>) -> String {
    let mut ids: Vec<String> = known.iter().map(|id| id.key().clone()).collect();
    ids.sort();
    let skip = ids.len().saturating_sub(CHECKPOINT_LIMIT);
    ids[skip..].join(",")
}

/// Discovers skills on skills.sh and remembers which ids it has queued.
#[derive(Debug)]
pub struct SkillsWatcher {
    http: reqwest::Client,
    config: SkillsWatcherConfig,
    checkpoints: CheckpointStore,
    known: DashSet<String>,
    loaded: AtomicBool,
    next_query: AtomicUsize,
}

impl SkillsWatcher {
    /// Create the watcher.
    pub fn new(
        http: reqwest::Client,
        config: SkillsWatcherConfig,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            http,
            config,
            checkpoints,
            known: DashSet::new(),
            loaded: AtomicBool::new(false),
            next_query: AtomicUsize::new(0),
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.config.request_delay_ms)
    }

    async fn load_known(&self) -> AppResult<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(raw) = self.checkpoints.load().await? {
            for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                self.known.insert(id.to_string());
            }
        }
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    async fn search(&self, query: &str) -> AppResult<Vec<SkillInfo>> {
        if query.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let limit = self.config.search_limit.to_string();
        let url = reqwest::Url::parse_with_params(
            &self.config.search_url,
            &[("q", query), ("limit", limit.as_str())],
        )
        .map_err(|e| AppError::configuration(format!("Invalid skills.sh search URL: {e}")))?;

        let response: SearchResponse = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_failed("skills.sh search failed", e))?
            .json()
            .await
            .map_err(|e| request_failed("skills.sh search decode failed", e))?;
        Ok(response.skills)
    }

    /// Audit results for a batch of skills from one repository; empty on
    /// any failure.
    async fn audits(&self, source: &str, slugs: &[&str]) -> AuditResults {
        let skills = slugs.join(",");
        let url = match reqwest::Url::parse_with_params(
            &self.config.audit_url,
            &[("source", source), ("skills", skills.as_str())],
        ) {
            Ok(url) => url,
            Err(e) => {
                debug!(source = %source, error = %e, "Invalid skills.sh audit URL");
                return AuditResults::new();
            }
        };
        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
            Ok(resp) => {
                debug!(source = %source, status = %resp.status(), "skills.sh audit unavailable");
                AuditResults::new()
            }
            Err(e) => {
                debug!(source = %source, error = %e, "skills.sh audit request failed");
                AuditResults::new()
            }
        }
    }

    /// Run `queries`; an error only when every one of them failed.
    async fn discover(&self, queries: &[&str]) -> AppResult<Vec<SkillInfo>> {
        let mut found = Vec::new();
        let mut failures = 0;
        for (i, query) in queries.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay()).await;
            }
            match self.search(query).await {
                Ok(skills) => found.extend(skills),
                Err(e) => {
                    failures += 1;
                    debug!(watcher = WATCHER_NAME, query = %query, error = %e, "skills.sh search failed");
                }
            }
        }
        if failures > 0 && failures == queries.len() {
            return Err(AppError::external("Every skills.sh search failed"));
        }
        Ok(found)
    }

    async fn collect_audits(&self, skills: &[&SkillInfo]) -> AuditResults {
        let mut by_source: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for skill in skills.iter().filter(|s| !s.source.is_empty()) {
            by_source.entry(skill.source.as_str()).or_default().push(skill.slug());
        }

        let mut audits = AuditResults::new();
        for (source, slugs) in by_source {
            for batch in slugs.chunks(AUDIT_BATCH) {
                audits.extend(self.audits(source, batch).await);
                tokio::time::sleep(self.delay()).await;
            }
        }
        audits
    }
}

#[async_trait]
impl Watcher for SkillsWatcher {
    fn name(&self) -> &str {
        WATCHER_NAME
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_seconds)
    }

    async fn poll(&self) -> AppResult<Vec<ScanJob>> {
        self.load_known().await?;

        let queries = if self.known.is_empty() {
            info!(
                watcher = WATCHER_NAME,
                queries = DISCOVERY_QUERIES.len(),
                "Starting initial skills crawl"
            );
            DISCOVERY_QUERIES.to_vec()
        } else {
            let count = self.config.queries_per_poll;
            let start = self.next_query.fetch_add(count, Ordering::Relaxed);
            query_batch(start, count)
        };

        let found = self.discover(&queries).await?;
        let fresh = unseen(&found, &self.known);
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let audits = self.collect_audits(&fresh).await;
        let mut jobs = Vec::new();
        for skill in fresh {
            if let Some(job) = job_from_skill(skill, assessments_for(skill, &audits)) {
                self.known.insert(skill.id.clone());
                jobs.push(job);
            }
        }

        if !self.known.is_empty() {
            self.checkpoints.save(&checkpoint_value(&self.known)).await?;
        }
        info!(
            watcher = WATCHER_NAME,
            queued = jobs.len(),
            known = self.known.len(),
            "skills.sh discovery processed"
        );
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hits() -> Vec<SkillInfo> {
        let response: SearchResponse = serde_json::from_value(json!({
            "skills": [
                {"id": "vercel-labs/skills/find-skills", "skillId": "find-skills", "name": "find-skills", "source": "vercel-labs/skills", "installs": 1200},
                {"id": "acme/tools/pdf", "name": "PDF Tools", "source": "acme/tools"},
                {"id": "vercel-labs/skills/find-skills", "skillId": "find-skills", "source": "vercel-labs/skills"},
                {"id": "", "name": "broken"},
                {"id": "nowhere/skill", "skillId": "skill"}
            ]
        }))
        .unwrap();
        response.skills
    }

    #[test]
    fn test_query_batches_wrap() {
        assert_eq!(query_batch(0, 3), vec!["ag", "ai", "an"]);
        let last = DISCOVERY_QUERIES.len() - 1;
        assert_eq!(query_batch(last, 2), vec!["seo", "ag"]);
        assert_eq!(query_batch(7, 0), Vec::<&str>::new());
        assert_eq!(query_batch(0, 1000).len(), DISCOVERY_QUERIES.len());
    }

    #[test]
    fn test_unseen_skips_known_and_duplicates() {
        let skills = hits();
        let known = DashSet::new();
        known.insert("acme/tools/pdf".to_string());
        let fresh = unseen(&skills, &known);
        let ids: Vec<_> = fresh.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["vercel-labs/skills/find-skills", "nowhere/skill"]);
        assert_eq!(fresh[0].slug(), "find-skills");
    }

    #[test]
    fn test_job_carries_assessments() {
        let skills = hits();
        let audits: AuditResults = serde_json::from_value(json!({
            "find-skills": {
                "snyk": {"risk": "low", "alerts": 1, "score": 92, "analyzedAt": "2026-10-01"},
                "socket": {}
            }
        }))
        .unwrap();

        let job = job_from_skill(&skills[0], assessments_for(&skills[0], &audits)).unwrap();
        assert_eq!(job.ecosystem, "skills");
        assert_eq!(job.name, "vercel-labs/skills/find-skills");
        assert_eq!(job.version, "");
        assert_eq!(job.download_url, "https://github.com/vercel-labs/skills.git");
        assert_eq!(job.metadata.get_str(keys::SOURCE), Some("vercel-labs/skills"));
        assert_eq!(job.metadata.get_str("skill_path"), Some("skills/find-skills"));
        assert_eq!(job.metadata.get("installs"), Some(&json!(1200)));
        assert_eq!(
            job.metadata.get("provider_assessments"),
            Some(&json!({
                "snyk": {"risk": "low", "alerts": 1, "score": 92, "analyzed_at": "2026-10-01"},
                "socket": {"risk": "unknown", "alerts": 0, "score": null, "analyzed_at": ""}
            }))
        );

        let other = assessments_for(&skills[1], &audits);
        assert_eq!(other, json!({}));
        assert!(job_from_skill(&skills[4], json!({})).is_none());
    }

    #[test]
    fn test_checkpoint_keeps_the_last_ids() {
        let known = DashSet::new();
        for id in ["b/x", "a/y", "c/z"] {
            known.insert(id.to_string());
        }
        assert_eq!(checkpoint_value(&known), "a/y,b/x,c/z");

        let many = DashSet::new();
        for i in 0..CHECKPOINT_LIMIT + 5 {
            many.insert(format!("{i:06}"));
        }
        let value = checkpoint_value(&many);
        assert_eq!(value.split(',').count(), CHECKPOINT_LIMIT);
        assert!(value.starts_with("000005,"));
    }
}
