//! Settings for the bundled collaborator adapters.

use serde::{Deserialize, Serialize};

/// Downloader, scanner, and result-store adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Path to the sigil scanner CLI.
    #[serde(default = "default_sigil_bin")]
    pub sigil_bin: String,
    /// Directory holding one JSON result document per artifact.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Upper bound on a single package-manager fetch, in seconds.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            sigil_bin: default_sigil_bin(),
            results_dir: default_results_dir(),
            download_timeout_seconds: default_download_timeout(),
        }
    }
}

fn default_sigil_bin() -> String {
    "sigil".to_string()
}

fn default_results_dir() -> String {
    "data/results".to_string()
}

fn default_download_timeout() -> u64 {
    120
}
