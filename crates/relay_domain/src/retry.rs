use derive_setters::Setters;
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff policy.
///
/// Converted to a `backon` strategy at the call site; kept as plain data
/// here so configuration stays serializable.
#[derive(Debug, Clone, Serialize, Deserialize, Setters, PartialEq)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct RetryConfig {
    /// Initial delay in milliseconds between retry attempts
    pub min_delay_ms: u64,

    /// Maximum delay in milliseconds between retry attempts
    pub max_delay_ms: u64,

    /// Backoff multiplication factor for each retry attempt
    pub backoff_factor: f32,

    /// Maximum number of retry attempts after the first try
    pub max_retry_attempts: usize,

    /// Per-attempt timeout in milliseconds
    pub attempt_timeout_ms: u64,

    /// Whether to add proportional jitter to each delay
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy for OAuth token and refresh requests: 3 attempts, 1s initial,
    /// 10s cap, factor 2, 30s per attempt.
    pub fn oauth() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            max_retry_attempts: 3,
            attempt_timeout_ms: 30_000,
            jitter: false,
        }
    }

    /// Policy for chat streaming requests: 3 attempts, 500ms initial, 5s
    /// cap, factor 2, 10% jitter.
    pub fn chat() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            max_retry_attempts: 3,
            attempt_timeout_ms: 30_000,
            jitter: true,
        }
    }

    /// Delay before the given zero-based retry attempt, without jitter
    pub fn delay_for_attempt(&self, attempt: usize) -> std::time::Duration {
        let factor = self.backoff_factor.powi(attempt as i32) as f64;
        let millis = (self.min_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_oauth_policy_delays() {
        let config = RetryConfig::oauth();

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        // Capped at 10s
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn test_chat_policy_caps_at_five_seconds() {
        let config = RetryConfig::chat();
        assert_eq!(config.delay_for_attempt(6), Duration::from_secs(5));
    }
}
