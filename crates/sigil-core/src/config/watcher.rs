//! Registry watcher configuration.

use serde::{Deserialize, Serialize};

/// Settings shared by all watchers plus one section per registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchersConfig {
    /// Timeout applied to every registry HTTP request, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// npm replication feed watcher.
    #[serde(default)]
    pub npm: NpmWatcherConfig,
    /// PyPI changelog and RSS watcher.
    #[serde(default)]
    pub pypi: PypiWatcherConfig,
    /// ClawHub skill registry watcher.
    #[serde(default)]
    pub clawhub: ClawhubWatcherConfig,
    /// GitHub MCP repository watcher.
    #[serde(default)]
    pub github: GithubWatcherConfig,
    /// skills.sh directory watcher.
    #[serde(default)]
    pub skills: SkillsWatcherConfig,
}

impl Default for WatchersConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout(),
            npm: NpmWatcherConfig::default(),
            pypi: PypiWatcherConfig::default(),
            clawhub: ClawhubWatcherConfig::default(),
            github: GithubWatcherConfig::default(),
            skills: SkillsWatcherConfig::default(),
        }
    }
}

/// npm `_changes` feed watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpmWatcherConfig {
    /// Whether the watcher runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between polls.
    #[serde(default = "default_npm_interval")]
    pub poll_interval_seconds: u64,
    /// Root of the CouchDB replication endpoint.
    #[serde(default = "default_npm_replicate_url")]
    pub replicate_url: String,
    /// Registry used for package metadata lookups.
    #[serde(default = "default_npm_registry_url")]
    pub registry_url: String,
    /// Maximum changes fetched per poll.
    #[serde(default = "default_npm_batch_limit")]
    pub batch_limit: u32,
}

impl Default for NpmWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_seconds: default_npm_interval(),
            replicate_url: default_npm_replicate_url(),
            registry_url: default_npm_registry_url(),
            batch_limit: default_npm_batch_limit(),
        }
    }
}

/// PyPI watcher. Every poll reads the XML-RPC changelog; the RSS feeds
/// are read on every `rss_every_polls`-th poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PypiWatcherConfig {
    /// Whether the watcher runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between polls.
    #[serde(default = "default_pypi_interval")]
    pub poll_interval_seconds: u64,
    /// RSS feeds to read (new packages and updates).
    #[serde(default = "default_pypi_feeds")]
    pub feeds: Vec<String>,
    /// JSON API root used for metadata enrichment.
    #[serde(default = "default_pypi_json_api")]
    pub json_api_url: String,
    /// XML-RPC endpoint serving `changelog_since_serial`.
    #[serde(default = "default_pypi_xmlrpc")]
    pub xmlrpc_url: String,
    /// Read the RSS feeds on every n-th poll; `0` disables them.
    #[serde(default = "default_pypi_rss_every")]
    pub rss_every_polls: u64,
}

impl Default for PypiWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_seconds: default_pypi_interval(),
            feeds: default_pypi_feeds(),
            json_api_url: default_pypi_json_api(),
            xmlrpc_url: default_pypi_xmlrpc(),
            rss_every_polls: default_pypi_rss_every(),
        }
    }
}

/// ClawHub skill registry watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClawhubWatcherConfig {
    /// Whether the watcher runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between polls.
    #[serde(default = "default_six_hours")]
    pub poll_interval_seconds: u64,
    /// API root, e.g. `https://clawhub.ai/api/v1`.
    #[serde(default = "default_clawhub_api")]
    pub api_url: String,
    /// Skills requested per page.
    #[serde(default = "default_clawhub_page_size")]
    pub page_size: u32,
    /// Upper bound on pages walked in one poll.
    #[serde(default = "default_clawhub_max_pages")]
    pub max_pages: u32,
    /// Pause between page requests, in milliseconds.
    #[serde(default = "default_clawhub_page_delay")]
    pub page_delay_ms: u64,
}

impl Default for ClawhubWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_seconds: default_six_hours(),
            api_url: default_clawhub_api(),
            page_size: default_clawhub_page_size(),
            max_pages: default_clawhub_max_pages(),
            page_delay_ms: default_clawhub_page_delay(),
        }
    }
}

/// GitHub watcher. Every poll reads the public events stream for known
/// repositories; every `search_every_polls`-th poll also runs one
/// repository search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubWatcherConfig {
    /// Whether the watcher runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between polls.
    #[serde(default = "default_github_interval")]
    pub poll_interval_seconds: u64,
    /// REST API root.
    #[serde(default = "default_github_api")]
    pub api_url: String,
    /// Bearer token; unauthenticated requests are heavily rate limited.
    #[serde(default)]
    pub token: Option<String>,
    /// Run a repository search on every n-th poll.
    #[serde(default = "default_github_search_every")]
    pub search_every_polls: u64,
    /// Search result pages walked per search (100 results each).
    #[serde(default = "default_github_search_pages")]
    pub search_pages: u32,
    /// Search queries, rotated one per search.
    #[serde(default = "default_github_queries")]
    pub search_queries: Vec<String>,
}

impl Default for GithubWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_seconds: default_github_interval(),
            api_url: default_github_api(),
            token: None,
            search_every_polls: default_github_search_every(),
            search_pages: default_github_search_pages(),
            search_queries: default_github_queries(),
        }
    }
}

impl GithubWatcherConfig {
    /// The configured token, ignoring blanks and placeholder values.
    pub fn bearer_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "not-configured")
    }
}

/// skills.sh directory watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsWatcherConfig {
    /// Whether the watcher runs.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between polls.
    #[serde(default = "default_six_hours")]
    pub poll_interval_seconds: u64,
    /// Directory search endpoint.
    #[serde(default = "default_skills_search")]
    pub search_url: String,
    /// Provider audit endpoint.
    #[serde(default = "default_skills_audit")]
    pub audit_url: String,
    /// Discovery queries run per incremental poll.
    #[serde(default = "default_skills_queries_per_poll")]
    pub queries_per_poll: usize,
    /// Results requested per query.
    #[serde(default = "default_skills_limit")]
    pub search_limit: u32,
    /// Pause between search and audit requests, in milliseconds.
    #[serde(default = "default_skills_request_delay")]
    pub request_delay_ms: u64,
}

impl Default for SkillsWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_seconds: default_six_hours(),
            search_url: default_skills_search(),
            audit_url: default_skills_audit(),
            queries_per_poll: default_skills_queries_per_poll(),
            search_limit: default_skills_limit(),
            request_delay_ms: default_skills_request_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    60
}

fn default_npm_interval() -> u64 {
    60
}

fn default_npm_replicate_url() -> String {
    "https://replicate.npmjs.com".to_string()
}

fn default_npm_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_npm_batch_limit() -> u32 {
    100
}

fn default_pypi_interval() -> u64 {
    60
}

fn default_pypi_feeds() -> Vec<String> {
    vec![
        "https://pypi.org/rss/packages.xml".to_string(),
        "https://pypi.org/rss/updates.xml".to_string(),
    ]
}

fn default_pypi_json_api() -> String {
    "https://pypi.org/pypi".to_string()
}

fn default_pypi_xmlrpc() -> String {
    "https://pypi.org/pypi".to_string()
}

fn default_pypi_rss_every() -> u64 {
    5
}

fn default_six_hours() -> u64 {
    21_600
}

fn default_clawhub_api() -> String {
    "https://clawhub.ai/api/v1".to_string()
}

fn default_clawhub_page_size() -> u32 {
    20
}

fn default_clawhub_max_pages() -> u32 {
    300
}

fn default_clawhub_page_delay() -> u64 {
    500
}

fn default_github_interval() -> u64 {
    1_800
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_search_every() -> u64 {
    24
}

fn default_github_search_pages() -> u32 {
    10
}

fn default_github_queries() -> Vec<String> {
    [
        "mcp server",
        "model context protocol",
        "topic:mcp-server",
        "filename:mcp.json",
        "\"McpServer\" language:typescript",
        "\"@modelcontextprotocol\" language:python",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_skills_search() -> String {
    "https://skills.sh/api/search".to_string()
}

fn default_skills_audit() -> String {
    "https://add-skill.vercel.sh/audit".to_string()
}

fn default_skills_queries_per_poll() -> usize {
    5
}

fn default_skills_limit() -> u32 {
    50
}

fn default_skills_request_delay() -> u64 {
    500
}
