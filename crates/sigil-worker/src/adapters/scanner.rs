//! Scanner backed by the sigil CLI.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use sigil_core::error::{AppError, ErrorKind};
use sigil_core::result::AppResult;
use serde_json::Value;
use sigil_entity::scan::{ScanOutput, Verdict};

use super::process::{self, excerpt};
use crate::collaborators::Scanner;

/// Runs `<sigil_bin> --format json scan <dir>` and parses stdout.
///
/// The CLI exits non-zero when it finds something, so the exit status is
/// ignored as long as stdout holds a report.
#[derive(Debug, Clone)]
pub struct CliScanner {
    bin: String,
}

impl CliScanner {
    /// Create a scanner invoking `bin`.
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl Scanner for CliScanner {
    async fn scan(&self, dir: &Path) -> AppResult<ScanOutput> {
        let dir_str = dir.to_string_lossy();
        let args = ["--format", "json", "scan", &*dir_str];
        let output = process::run(&self.bin, &args, None, None).await?;
        debug!(
            code = output.status.code().unwrap_or(-1),
            stdout_bytes = output.stdout.len(),
            "Scanner finished"
        );
        parse_report(&output.stdout).map_err(|e| {
            AppError::new(
                ErrorKind::ExternalService,
                format!("{} (stderr: {})", e.message, excerpt(&output.stderr, 500)),
            )
        })
    }
}

/// Parse the CLI's JSON report.
///
/// `--format json` prints up to three documents in sequence: a summary
/// object, the findings array, and a `{"verdict": ...}` trailer. A single
/// object carrying its own `findings` is also accepted.
pub(crate) fn parse_report(stdout: &[u8]) -> AppResult<ScanOutput> {
    let mut summary: Option<ScanOutput> = None;
    let mut findings: Option<Vec<Value>> = None;
    let mut verdict: Option<Verdict> = None;

    for document in serde_json::Deserializer::from_slice(stdout).into_iter::<Value>() {
        match document.map_err(unreadable)? {
            Value::Array(items) => findings = Some(items),
            Value::Object(mut map) if map.len() == 1 && map.contains_key("verdict") => {
                if let Some(value) = map.remove("verdict") {
                    verdict = Some(serde_json::from_value(value).map_err(unreadable)?);
                }
            }
            document @ Value::Object(_) if summary.is_none() => {
                summary = Some(serde_json::from_value(document).map_err(unreadable)?);
            }
            other => debug!(document = %other, "Ignoring extra scanner output"),
        }
    }

    let Some(mut output) = summary else {
        return Err(AppError::new(
            ErrorKind::ExternalService,
            "Scanner produced no report",
        ));
    };
    if let Some(findings) = findings {
        output.findings = findings;
    }
    if let Some(verdict) = verdict {
        output.verdict = verdict;
    }
    Ok(output)
}

fn unreadable(e: serde_json::Error) -> AppError {
    AppError::with_source(
        ErrorKind::Serialization,
        format!("Unreadable scanner report: {e}"),
        e,
    )
}
