//! Artifact fetcher driving `npm`, `pip`, `git`, and `tar`, plus direct
//! ZIP downloads for ClawHub skills.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use zip::ZipArchive;

use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;
use sigil_entity::job::ScanJob;

use super::process::{self, excerpt};
use crate::collaborators::Downloader;
use crate::encoding::encode_name;

/// Entry limit for a skill archive.
const MAX_ZIP_FILES: usize = 10_000;

/// Uncompressed size limit for a skill archive.
const MAX_EXTRACTED_SIZE: u64 = 512 * 1024 * 1024;

const BUFFER_SIZE: usize = 64 * 1024;

/// How a job's artifact is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FetchPlan {
    /// `npm pack <spec>` then unpack every `.tgz`.
    Npm(String),
    /// `pip download --no-deps <spec>` then unpack every `.tar.gz`.
    Pip(String),
    /// Shallow `git clone` into `repo/`.
    Git(String),
    /// Fetch a ZIP and extract it in place; when the archive is
    /// unavailable, fetch the lone `SKILL.md` from `skill_file` instead.
    Zip {
        url: String,
        skill_file: Option<String>,
    },
}

impl FetchPlan {
    /// Pick a plan for the job; `None` when nothing can fetch it.
    pub fn for_job(job: &ScanJob) -> Option<Self> {
        match job.ecosystem.as_str() {
            "npm" => Some(Self::Npm(if job.version.is_empty() {
                job.name.clone()
            } else {
                format!("{}@{}", job.name, job.version)
            })),
            "pypi" | "pip" => Some(Self::Pip(if job.version.is_empty() {
                job.name.clone()
            } else {
                format!("{}=={}", job.name, job.version)
            })),
            "clawhub" if job.download_url.is_empty() => None,
            "clawhub" => Some(Self::Zip {
                url: job.download_url.clone(),
                skill_file: skill_file_url(&job.download_url, &job.name, &job.version),
            }),
            "github" | "skills" if job.download_url.is_empty() => {
                Some(Self::Git(format!("https://github.com/{}.git", job.name)))
            }
            _ if !job.download_url.is_empty() => Some(Self::Git(job.download_url.clone())),
            _ => None,
        }
    }
}

/// `SKILL.md` endpoint next to a ClawHub `.../download?slug=` URL.
pub(crate) fn skill_file_url(download_url: &str, slug: &str, version: &str) -> Option<String> {
    let (base, _) = download_url.split_once("/download?")?;
    let version = if version.is_empty() { "latest" } else { version };
    Some(format!(
        "{base}/skills/{}/file?path=SKILL.md&version={}",
        encode_name(slug),
        encode_name(version)
    ))
}

/// Fetches artifacts with the ecosystem's own tooling.
#[derive(Debug, Clone)]
pub struct CommandDownloader {
    timeout: Duration,
    http: reqwest::Client,
}

impl CommandDownloader {
    /// Create a downloader; a whole download is bounded by `timeout`.
    pub fn new(timeout: Duration, http: reqwest::Client) -> Self {
        Self { timeout, http }
    }

    async fn step(&self, program: &str, args: &[&str], cwd: &Path) -> AppResult<bool> {
        let output = process::run(program, args, Some(cwd), Some(self.timeout)).await?;
        if !output.status.success() {
            warn!(
                program = %program,
                code = output.status.code().unwrap_or(-1),
                stderr = %excerpt(&output.stderr, 500),
                "Download command failed"
            );
        }
        Ok(output.status.success())
    }

    async fn unpack_all(&self, dest: &Path, suffix: &str) -> AppResult<()> {
        let dest_str = dest.to_string_lossy();
        for archive in files_with_suffix(dest, suffix).await? {
            let archive = archive.to_string_lossy();
            let args = ["xzf", &*archive, "-C", &*dest_str];
            if !self.step("tar", &args, dest).await? {
                debug!(archive = %archive, "Archive left packed");
            }
        }
        Ok(())
    }

    /// Body of a successful GET; `None` on any failure status.
    async fn fetch_bytes(&self, url: &str) -> AppResult<Option<Vec<u8>>> {
        let response = self.http.get(url).send().await.map_err(|e| {
            let message = format!("GET {url} failed: {e}");
            AppError::with_source(ErrorKind::ExternalService, message, e)
        })?;
        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "Artifact unavailable");
            return Ok(None);
        }
        let body = response.bytes().await.map_err(|e| {
            let message = format!("Reading {url} failed: {e}");
            AppError::with_source(ErrorKind::ExternalService, message, e)
        })?;
        Ok(Some(body.to_vec()))
    }

    async fn fetch_zip(
        &self,
        url: &str,
        skill_file: Option<&str>,
        dest: &Path,
    ) -> AppResult<bool> {
        if let Some(archive) = self.fetch_bytes(url).await?.filter(|b| !b.is_empty()) {
            let target = dest.to_path_buf();
            return tokio::task::spawn_blocking(move || unpack_skill(&archive, &target))
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Storage, "Archive extraction panicked", e)
                })?;
        }

        let Some(skill_file) = skill_file else {
            return Ok(false);
        };
        match self.fetch_bytes(skill_file).await? {
            Some(content) => {
                tokio::fs::write(dest.join("SKILL.md"), skill_markdown(&content)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fetch(&self, plan: FetchPlan, dest: &Path) -> AppResult<bool> {
        let dest_str = dest.to_string_lossy();

        match plan {
            FetchPlan::Npm(spec) => {
                let args = ["pack", spec.as_str(), "--pack-destination", &*dest_str];
                if !self.step("npm", &args, dest).await? {
                    return Ok(false);
                }
                self.unpack_all(dest, ".tgz").await?;
            }
            FetchPlan::Pip(spec) => {
                let args = ["download", "--no-deps", "-d", &*dest_str, spec.as_str()];
                if !self.step("pip", &args, dest).await? {
                    return Ok(false);
                }
                self.unpack_all(dest, ".tar.gz").await?;
            }
            FetchPlan::Git(url) => {
                let target = dest.join("repo");
                let target = target.to_string_lossy();
                let args = ["clone", "--depth", "1", url.as_str(), &*target];
                if !self.step("git", &args, dest).await? {
                    return Ok(false);
                }
            }
            FetchPlan::Zip { url, skill_file } => {
                if !self.fetch_zip(&url, skill_file.as_deref(), dest).await? {
                    return Ok(false);
                }
            }
        }

        Ok(!files_with_suffix(dest, "").await?.is_empty())
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    async fn download(&self, job: &ScanJob, dest: &Path) -> AppResult<bool> {
        let Some(plan) = FetchPlan::for_job(job) else {
            warn!(
                job_id = %job.id,
                ecosystem = %job.ecosystem,
                "No download method for ecosystem"
            );
            return Ok(false);
        };

        match tokio::time::timeout(self.timeout, self.fetch(plan, dest)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(format!(
                "Download of {}@{} did not finish within {}s",
                job.name,
                job.version,
                self.timeout.as_secs()
            ))),
        }
    }
}

/// The file endpoint answers either raw markdown or `{"content": ...}`.
fn skill_markdown(body: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(doc) => match doc.get("content").and_then(serde_json::Value::as_str) {
            Some(content) => content.as_bytes().to_vec(),
            None => body.to_vec(),
        },
        Err(_) => body.to_vec(),
    }
}

/// Extract a skill archive into `dest`. Entries whose path would leave
/// `dest` are skipped. A body that is not a ZIP at all is kept as
/// `SKILL.md`.
pub(crate) fn unpack_skill(bytes: &[u8], dest: &Path) -> AppResult<bool> {
    let mut archive = match ZipArchive::new(std::io::Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(e) => {
            debug!(error = %e, "Skill download is not a ZIP, keeping it as SKILL.md");
            fs::write(dest.join("SKILL.md"), bytes)?;
            return Ok(true);
        }
    };

    if archive.len() > MAX_ZIP_FILES {
        warn!(entries = archive.len(), limit = MAX_ZIP_FILES, "Skill archive has too many entries");
        return Ok(false);
    }

    let mut total_size = 0u64;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = %entry.name(), "Skipping archive entry outside the destination");
            continue;
        };
        let out_path = dest.join(relative);

        total_size += entry.size();
        if total_size > MAX_EXTRACTED_SIZE {
            warn!(limit = MAX_EXTRACTED_SIZE, "Skill archive exceeds the extraction limit");
            return Ok(false);
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&out_path)?;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let n = entry.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            outfile.write_all(&buffer[..n])?;
        }
    }
    Ok(true)
}

fn zip_error(e: zip::result::ZipError) -> AppError {
    AppError::with_source(ErrorKind::Serialization, format!("Corrupt skill archive: {e}"), e)
}

async fn files_with_suffix(dir: &Path, suffix: &str) -> AppResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_plans() {
        assert_eq!(
            FetchPlan::for_job(&ScanJob::new("npm", "@scope/pkg", "1.0.0")),
            Some(FetchPlan::Npm("@scope/pkg@1.0.0".to_string()))
        );
        assert_eq!(
            FetchPlan::for_job(&ScanJob::new("pypi", "agent-kit", "")),
            Some(FetchPlan::Pip("agent-kit".to_string()))
        );
        assert_eq!(
            FetchPlan::for_job(&ScanJob::new("github", "owner/repo", "")),
            Some(FetchPlan::Git("https://github.com/owner/repo.git".to_string()))
        );
        assert_eq!(
            FetchPlan::for_job(
                &ScanJob::new("skills", "x", "").with_download_url("https://example.com/x.git")
            ),
            Some(FetchPlan::Git("https://example.com/x.git".to_string()))
        );
        assert_eq!(FetchPlan::for_job(&ScanJob::new("cargo", "serde", "1")), None);
    }

    #[test]
    fn test_clawhub_plan_fetches_the_archive() {
        let job = ScanJob::new("clawhub", "git-helper", "1.4.0")
            .with_download_url("https://clawhub.ai/api/v1/download?slug=git-helper&version=1.4.0");
        assert_eq!(
            FetchPlan::for_job(&job),
            Some(FetchPlan::Zip {
                url: job.download_url.clone(),
                skill_file: Some(
                    "https://clawhub.ai/api/v1/skills/git-helper/file?path=SKILL.md&version=1.4.0"
                        .to_string()
                ),
            })
        );
        assert_eq!(FetchPlan::for_job(&ScanJob::new("clawhub", "git-helper", "")), None);
        assert_eq!(
            skill_file_url("https://clawhub.ai/api/v1/download?slug=x", "x", "").as_deref(),
            Some("https://clawhub.ai/api/v1/skills/x/file?path=SKILL.md&version=latest")
        );
        assert_eq!(skill_file_url("https://mirror.example/x.zip", "x", ""), None);
    }

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        use zip::write::SimpleFileOptions;

        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_unpack_skill_archive() {
        let root = tempfile::tempdir().unwrap();
        let dest = root.path().join("job");
        std::fs::create_dir(&dest).unwrap();

        let bytes = archive(&[
            ("SKILL.md", "# Git helper"),
            ("scripts/run.sh", "echo hi"),
            ("../escape.txt", "nope"),
        ]);
        assert!(unpack_skill(&bytes, &dest).unwrap());
        assert_eq!(std::fs::read_to_string(dest.join("SKILL.md")).unwrap(), "# Git helper");
        assert!(dest.join("scripts/run.sh").exists());
        assert!(!root.path().join("escape.txt").exists());
    }

    #[test]
    fn test_non_zip_body_is_kept_as_skill_file() {
        let dest = tempfile::tempdir().unwrap();
        assert!(unpack_skill(b"# Plain skill", dest.path()).unwrap());
        assert_eq!(
            std::fs::read_to_string(dest.path().join("SKILL.md")).unwrap(),
            "# Plain skill"
        );
    }

    #[test]
    fn test_skill_file_body_shapes() {
        assert_eq!(skill_markdown(br##"{"content": "# From JSON"}"##), b"# From JSON".to_vec());
        assert_eq!(skill_markdown(b"# Raw"), b"# Raw".to_vec());
        assert_eq!(skill_markdown(br#"{"path": "SKILL.md"}"#), br#"{"path": "SKILL.md"}"#.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_whole_download_is_bounded() {
        use std::net::SocketAddr;
        use tokio::net::TcpListener;

        // Accepts connections and never answers.
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let downloader = CommandDownloader::new(Duration::from_secs(3), reqwest::Client::new());
        let job = ScanJob::new("clawhub", "slow", "1.0.0")
            .with_download_url(format!("http://{addr}/api/v1/download?slug=slow"));

        let err = downloader.download(&job, dir.path()).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.message.contains("within 3s"));
    }

    #[tokio::test]
    async fn test_unsupported_ecosystem_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = CommandDownloader::new(Duration::from_secs(5), reqwest::Client::new());
        let job = ScanJob::new("cargo", "serde", "1.0.0");
        assert!(!downloader.download(&job, dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_files_with_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-1.0.0.tgz"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let tgz = files_with_suffix(dir.path(), ".tgz").await.unwrap();
        assert_eq!(tgz.len(), 1);
        assert_eq!(files_with_suffix(dir.path(), "").await.unwrap().len(), 2);
    }
}
