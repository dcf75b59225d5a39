//! Key builders for every queue entry in the backing store.
//!
//! Centralising key construction prevents typos and makes it easy
//! to find every key the bot uses.

use sigil_entity::job::Lane;

/// Prefix applied when the configuration does not provide one.
pub const DEFAULT_PREFIX: &str = "sigil";

/// Key layout under a configurable prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    /// Create a key layout; an empty prefix falls back to [`DEFAULT_PREFIX`].
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(':').to_string();
        if prefix.is_empty() {
            Self {
                prefix: DEFAULT_PREFIX.to_string(),
            }
        } else {
            Self { prefix }
        }
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ── Lanes ──────────────────────────────────────────────

    /// List holding pending jobs for a lane.
    pub fn lane(&self, lane: Lane) -> String {
        format!("{}:queue:{}", self.prefix, lane.as_str())
    }

    /// Lane lists in strict dequeue order.
    pub fn lanes(&self) -> [String; 3] {
        Lane::ALL.map(|lane| self.lane(lane))
    }

    // ── Bookkeeping ────────────────────────────────────────

    /// Hash of job id to dequeue epoch seconds.
    pub fn processing(&self) -> String {
        format!("{}:queue:processing", self.prefix)
    }

    /// List of dead-letter entries, newest at the head.
    pub fn dead_letter(&self) -> String {
        format!("{}:queue:dead_letter", self.prefix)
    }

    /// Sorted set of delayed retries scored by ready epoch seconds.
    pub fn retry(&self) -> String {
        format!("{}:queue:retry", self.prefix)
    }

    /// Set of dedup keys currently in flight.
    pub fn dedup(&self) -> String {
        format!("{}:dedup", self.prefix)
    }

    // ── Watchers ───────────────────────────────────────────

    /// Checkpoint string for a watcher.
    pub fn checkpoint(&self, watcher: &str) -> String {
        format!("{}:checkpoint:{watcher}", self.prefix)
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
