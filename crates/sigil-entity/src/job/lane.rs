//! Priority lanes and the priority strings that select them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known job priority strings.
///
/// Priorities are carried as free-form strings on the job; anything that is
/// not `critical` or `high` is served from the normal lane.
pub mod priority {
    /// Served before everything else.
    pub const CRITICAL: &str = "critical";
    /// Served before normal work.
    pub const HIGH: &str = "high";
    /// Default priority.
    pub const NORMAL: &str = "normal";
    /// Background work such as rescans. Shares the normal lane.
    pub const LOW: &str = "low";
}

/// A priority-ordered FIFO sub-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Typosquat candidates and other urgent work.
    Critical,
    /// Direct-access skills, monitored scopes, popular packages.
    High,
    /// Everything else, including unrecognized priorities.
    Normal,
}

impl Lane {
    /// All lanes in strict dequeue order.
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::High, Lane::Normal];

    /// Map a job priority string to its lane.
    ///
    /// Matching is exact; unrecognized values (including `low`) fall back
    /// to [`Lane::Normal`].
    pub fn for_priority(priority: &str) -> Self {
        match priority {
            priority::CRITICAL => Self::Critical,
            priority::HIGH => Self::High,
            _ => Self::Normal,
        }
    }

    /// Return the lane as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
