//! Tunables for the limit engine.

use std::time::Duration;

use super::signal::{DEFAULT_RETRY_AFTER_SECS, MIN_FUTURE_MS};

/// Limit engine configuration.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    /// Every computed deadline lies at least this far in the future (ms).
    pub min_future_ms: u64,
    /// Rate cooldown when no duration is reported (seconds).
    pub default_retry_after_secs: u64,
    /// Countdown refresh interval while a deadline is pending.
    pub tick_interval: Duration,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            min_future_ms: MIN_FUTURE_MS,
            default_retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl LimitPolicy {
    /// Create a policy with custom values.
    pub fn new(min_future_ms: u64, default_retry_after_secs: u64, tick_interval: Duration) -> Self {
        Self {
            min_future_ms,
            default_retry_after_secs,
            tick_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_policy_default() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.min_future_ms, 1500);
        assert_eq!(policy.default_retry_after_secs, 30);
        assert_eq!(policy.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_limit_policy_custom() {
        let policy = LimitPolicy::new(2000, 60, Duration::from_millis(250));
        assert_eq!(policy.min_future_ms, 2000);
        assert_eq!(policy.default_retry_after_secs, 60);
        assert_eq!(policy.tick_interval, Duration::from_millis(250));
    }
}
