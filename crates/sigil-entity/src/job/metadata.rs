//! Open-ended job metadata with typed accessors for the keys the
//! pipeline reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known metadata keys. The map is open; these are the ones that
/// producers commonly set.
pub mod keys {
    /// Hash of the artifact content; part of the dedup key.
    pub const CONTENT_HASH: &str = "content_hash";
    /// Marks a job created by the rescan scheduler.
    pub const RESCAN: &str = "rescan";
    /// Verdict of the scan that triggered a rescan.
    pub const PREVIOUS_VERDICT: &str = "previous_verdict";
    /// Package author.
    pub const AUTHOR: &str = "author";
    /// Package description or summary.
    pub const DESCRIPTION: &str = "description";
    /// Package keyword list.
    pub const KEYWORDS: &str = "keywords";
    /// Which feed produced the job.
    pub const SOURCE: &str = "source";
    /// Weekly download count reported by the registry.
    pub const WEEKLY_DOWNLOADS: &str = "weekly_downloads";
    /// Repository URL recorded with a stored result.
    pub const REPOSITORY_URL: &str = "repository_url";
}

/// Key/value bag attached to every scan job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobMetadata(Map<String, Value>);

impl JobMetadata {
    /// Create an empty metadata bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Raw access to a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for a key, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Whether the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge every entry of `other` into this bag; `other` wins on conflicts.
    pub fn extend(&mut self, other: JobMetadata) {
        self.0.extend(other.0);
    }

    /// Content hash used in the dedup key. Non-string values count as absent.
    pub fn content_hash(&self) -> &str {
        self.get_str(keys::CONTENT_HASH).unwrap_or("")
    }

    /// Whether this job is a scheduled rescan.
    ///
    /// Accepts a JSON boolean or the string `"true"`; anything else is
    /// treated as not a rescan.
    pub fn is_rescan(&self) -> bool {
        match self.0.get(keys::RESCAN) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Verdict recorded by the scan that triggered a rescan.
    pub fn previous_verdict(&self) -> Option<&str> {
        self.get_str(keys::PREVIOUS_VERDICT)
    }

    /// Weekly downloads, accepting integers or numeric strings.
    pub fn weekly_downloads(&self) -> u64 {
        match self.0.get(keys::WEEKLY_DOWNLOADS) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        }
    }
}

impl From<Map<String, Value>> for JobMetadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_ignores_non_strings() {
        let meta = JobMetadata::new().with(keys::CONTENT_HASH, 42);
        assert_eq!(meta.content_hash(), "");

        let meta = JobMetadata::new().with(keys::CONTENT_HASH, "abc123");
        assert_eq!(meta.content_hash(), "abc123");
    }

    #[test]
    fn test_rescan_flag_variants() {
        assert!(JobMetadata::new().with(keys::RESCAN, true).is_rescan());
        assert!(JobMetadata::new().with(keys::RESCAN, "true").is_rescan());
        assert!(!JobMetadata::new().with(keys::RESCAN, false).is_rescan());
        assert!(!JobMetadata::new().with(keys::RESCAN, 1).is_rescan());
        assert!(!JobMetadata::new().is_rescan());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let meta = JobMetadata::new()
            .with(keys::AUTHOR, "alice")
            .with(keys::KEYWORDS, json!(["mcp", "agent"]));
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value, json!({"author": "alice", "keywords": ["mcp", "agent"]}));
    }

    #[test]
    fn test_weekly_downloads_parsing() {
        assert_eq!(JobMetadata::new().with(keys::WEEKLY_DOWNLOADS, 1500).weekly_downloads(), 1500);
        assert_eq!(JobMetadata::new().with(keys::WEEKLY_DOWNLOADS, "20").weekly_downloads(), 20);
        assert_eq!(JobMetadata::new().weekly_downloads(), 0);
    }
}
