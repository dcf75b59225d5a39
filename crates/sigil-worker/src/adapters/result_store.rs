//! Result store keeping one JSON document per artifact on disk.
//!
//! Layout: `{results_dir}/{ecosystem}/{encoded name}.json`. Each document
//! holds the most recent successful scan and, separately, the most recent
//! failure, so an error never hides the last good verdict from the rescan
//! scheduler.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use sigil_core::result::AppResult;
use sigil_entity::job::metadata::keys;
use sigil_entity::job::{JobMetadata, ScanJob};
use sigil_entity::scan::{ScanOutput, ScanRecord, Verdict};

use crate::collaborators::ResultStore;
use crate::encoding::encode_name;

const MAX_DESCRIPTION_CHARS: usize = 200;

/// Successful scan as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredScan {
    pub result_id: String,
    pub version: String,
    pub verdict: Verdict,
    pub score: f64,
    pub files_scanned: u64,
    pub findings_count: usize,
    #[serde(default)]
    pub findings: Vec<Value>,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub scanned_at: DateTime<Utc>,
}

/// Failed scan as persisted. Always carries the `ERROR` verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredError {
    pub job_id: String,
    pub version: String,
    pub verdict: Verdict,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything stored about one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDocument {
    pub ecosystem: String,
    pub name: String,
    #[serde(default)]
    pub latest: Option<StoredScan>,
    #[serde(default)]
    pub last_error: Option<StoredError>,
}

impl ArtifactDocument {
    fn empty(ecosystem: &str, name: &str) -> Self {
        Self {
            ecosystem: ecosystem.to_string(),
            name: name.to_string(),
            latest: None,
            last_error: None,
        }
    }

    fn record(&self) -> Option<ScanRecord> {
        let latest = self.latest.as_ref()?;
        Some(ScanRecord {
            ecosystem: self.ecosystem.clone(),
            name: self.name.clone(),
            version: latest.version.clone(),
            verdict: latest.verdict,
            metadata: latest.metadata.clone(),
            scanned_at: latest.scanned_at,
        })
    }
}

/// File-backed [`ResultStore`]. Writes are serialized through one lock and
/// land atomically via rename.
#[derive(Debug)]
pub struct JsonFileResultStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileResultStore {
    /// Store documents under `root`; created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the document for an artifact.
    pub fn document_path(&self, ecosystem: &str, name: &str) -> PathBuf {
        self.root
            .join(encode_component(ecosystem))
            .join(format!("{}.json", encode_component(name)))
    }

    /// Read the document for an artifact, if one exists.
    pub async fn document(
        &self,
        ecosystem: &str,
        name: &str,
    ) -> AppResult<Option<ArtifactDocument>> {
        read_document(&self.document_path(ecosystem, name)).await
    }

    async fn update<F>(&self, job: &ScanJob, apply: F) -> AppResult<()>
    where
        F: FnOnce(&mut ArtifactDocument),
    {
        let _guard = self.write_lock.lock().await;
        let path = self.document_path(&job.ecosystem, &job.name);
        let mut doc = read_document(&path)
            .await?
            .unwrap_or_else(|| ArtifactDocument::empty(&job.ecosystem, &job.name));
        apply(&mut doc);
        write_atomic(&path, &serde_json::to_vec_pretty(&doc)?).await
    }
}

#[async_trait]
impl ResultStore for JsonFileResultStore {
    async fn store_result(&self, job: &ScanJob, output: &ScanOutput) -> AppResult<String> {
        let stored = StoredScan {
            result_id: job.id.clone(),
            version: job.version.clone(),
            verdict: output.verdict,
            score: (output.score * 100.0).round() / 100.0,
            files_scanned: output.files_scanned,
            findings_count: output.findings_count(),
            findings: output.findings.clone(),
            metadata: enrich_metadata(job, output),
            scanned_at: Utc::now(),
        };
        let result_id = stored.result_id.clone();

        self.update(job, |doc| doc.latest = Some(stored)).await?;
        info!(
            ecosystem = %job.ecosystem,
            name = %job.name,
            version = %job.version,
            verdict = %output.verdict,
            "Scan stored"
        );
        Ok(result_id)
    }

    async fn store_error(&self, job: &ScanJob, error: &str) -> AppResult<()> {
        let stored = StoredError {
            job_id: job.id.clone(),
            version: job.version.clone(),
            verdict: Verdict::Error,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        self.update(job, |doc| doc.last_error = Some(stored)).await
    }

    async fn latest_scans(&self, scanned_before: DateTime<Utc>) -> AppResult<Vec<ScanRecord>> {
        let mut records = Vec::new();
        let mut ecosystems = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(eco) = ecosystems.next_entry().await? {
            if !eco.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(eco.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let doc = match read_document(&path).await {
                    Ok(Some(doc)) => doc,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable result");
                        continue;
                    }
                };
                if let Some(record) = doc.record() {
                    if record.verdict != Verdict::Error && record.scanned_at < scanned_before {
                        records.push(record);
                    }
                }
            }
        }
        Ok(records)
    }
}

/// Job metadata plus the scan provenance fields downstream consumers read.
fn enrich_metadata(job: &ScanJob, output: &ScanOutput) -> JobMetadata {
    let mut meta = job.metadata.clone();

    if meta.get_str(keys::SOURCE).is_none() {
        meta.insert(keys::SOURCE, "sigil-bot");
    }
    meta.insert("bot_scan", true);
    meta.insert("files_scanned", output.files_scanned);
    meta.insert("duration_ms", output.duration_ms);

    if let Some(desc) = meta.get_str(keys::DESCRIPTION) {
        if desc.chars().count() > MAX_DESCRIPTION_CHARS {
            let short: String = desc.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
            meta.insert(keys::DESCRIPTION, format!("{short}..."));
        }
    }

    if meta.get("registry_url").is_none() {
        if let Some(url) = registry_url(&job.ecosystem, &job.name, &job.version) {
            meta.insert("registry_url", url);
        }
    }

    if meta.get(keys::REPOSITORY_URL).is_none() {
        match job.ecosystem.as_str() {
            "github" => {
                let url = format!("https://github.com/{}", job.name);
                meta.insert(keys::REPOSITORY_URL, url);
            }
            "skills" => {
                if let Some(source) = meta.get_str(keys::SOURCE).filter(|s| s.contains('/')) {
                    let url = format!("https://github.com/{source}");
                    meta.insert(keys::REPOSITORY_URL, url);
                }
            }
            _ => {}
        }
    }

    if !job.download_url.is_empty() && meta.get("scanned_from").is_none() {
        meta.insert("scanned_from", job.download_url.clone());
    }
    meta
}

/// Public registry page for a package.
fn registry_url(ecosystem: &str, name: &str, version: &str) -> Option<String> {
    let url = match ecosystem {
        "npm" if version.is_empty() => format!("https://www.npmjs.com/package/{name}"),
        "npm" => format!("https://www.npmjs.com/package/{name}/v/{version}"),
        "pypi" | "pip" if version.is_empty() => format!("https://pypi.org/project/{name}/"),
        "pypi" | "pip" => format!("https://pypi.org/project/{name}/{version}/"),
        "github" => format!("https://github.com/{name}"),
        "clawhub" => format!("https://clawhub.com/skills/{name}"),
        "skills" => {
            let source = name.rsplit_once('/').map_or(name, |(owner, _)| owner);
            format!("https://github.com/{source}")
        }
        _ => return None,
    };
    Some(url)
}

/// One path component per name; a leading dot is encoded too so `..`
/// never escapes the results directory.
fn encode_component(raw: &str) -> String {
    let mut out = encode_name(raw);
    if out.starts_with('.') {
        out.replace_range(0..1, "%2E");
    }
    out
}

async fn read_document(path: &Path) -> AppResult<Option<ArtifactDocument>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
