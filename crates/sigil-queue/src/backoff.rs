//! Retry delay table.

use std::time::Duration;

use sigil_core::config::worker::WorkerConfig;

/// Maps a retry count to the delay before the job becomes ready again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    fallback: Duration,
}

impl RetryPolicy {
    /// Create a policy from an explicit table. Entry `i` applies to retry
    /// `i + 1`; counts past the table use `fallback`.
    pub fn new(delays: Vec<Duration>, fallback: Duration) -> Self {
        Self { delays, fallback }
    }

    /// Build the policy from worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config
                .retry_delays_seconds
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            Duration::from_secs(config.retry_delay_default_seconds),
        )
    }

    /// A policy where every retry is immediately ready.
    pub fn immediate() -> Self {
        Self::new(Vec::new(), Duration::ZERO)
    }

    /// Delay for the given retry count (already incremented).
    pub fn delay_for(&self, retries: u32) -> Duration {
        (retries as usize)
            .checked_sub(1)
            .and_then(|i| self.delays.get(i))
            .copied()
            .unwrap_or(self.fallback)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(300));
        assert_eq!(policy.delay_for(3), Duration::from_secs(1800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1800));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1800));
    }

    #[test]
    fn test_custom_table() {
        let policy = RetryPolicy::new(vec![Duration::from_secs(1)], Duration::from_secs(9));
        assert_eq!(policy.delay_for(0), Duration::from_secs(9));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(9));
    }
}
