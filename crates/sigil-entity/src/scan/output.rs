//! Scanner output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Risk classification produced by a scan.
///
/// The sigil CLI prints verdicts with spaces (`HIGH RISK`); both spellings
/// are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// No findings of note.
    Clean,
    /// Minor findings.
    #[serde(alias = "LOW RISK")]
    LowRisk,
    /// Findings that warrant a look.
    #[serde(alias = "MEDIUM RISK")]
    MediumRisk,
    /// Likely malicious or dangerous.
    #[serde(alias = "HIGH RISK")]
    HighRisk,
    /// Confirmed dangerous.
    #[serde(alias = "CRITICAL_RISK", alias = "CRITICAL RISK")]
    Critical,
    /// Recorded when the pipeline failed before a verdict was produced.
    Error,
}

impl Verdict {
    /// Return the verdict as its wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::LowRisk => "LOW_RISK",
            Self::MediumRisk => "MEDIUM_RISK",
            Self::HighRisk => "HIGH_RISK",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
        }
    }

    /// Whether the verdict puts the package on the short rescan cycle.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, Self::HighRisk | Self::Critical)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed result of one scanner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutput {
    /// Aggregate risk score.
    #[serde(default)]
    pub score: f64,
    /// Verdict derived from the score.
    pub verdict: Verdict,
    /// Number of files the scanner examined.
    #[serde(default)]
    pub files_scanned: u64,
    /// Individual findings, kept opaque.
    #[serde(default)]
    pub findings: Vec<Value>,
    /// Wall-clock scan duration.
    #[serde(default)]
    pub duration_ms: u64,
}

impl ScanOutput {
    /// Number of findings.
    pub fn findings_count(&self) -> usize {
        self.findings.len()
    }
}
