use std::time::Duration;

use crate::error::QueryError;

/// Decides whether a failed fetch is attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Returns `true` if attempt number `failures + 1` should be made after `error`.
    ///
    /// Missing resources and rejected sessions are never retried.
    #[must_use]
    pub const fn should_retry(&self, failures: u32, error: &QueryError) -> bool {
        if error.is_not_found() || matches!(error, QueryError::Unauthorized) {
            return false;
        }
        failures <= self.max_retries
    }
}

/// Configuration for query behavior.
///
/// This controls how long cached data is served without refetching and when
/// unused entries are dropped.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long data is considered fresh.
    ///
    /// Fresh data is returned from the cache without calling the producer.
    /// Defaults to [`Duration::MAX`]: cached data stays valid until it is
    /// invalidated.
    pub stale_time: Duration,

    /// How long cached data is retained before [`QueryCache::gc`](super::QueryCache::gc) drops it.
    pub cache_time: Duration,

    /// Retry behavior for failed fetches.
    pub retry: RetryPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::MAX,
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
            retry: RetryPolicy::default(),
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
            retry: RetryPolicy::new(2, Duration::ZERO),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert_eq!(config.stale_time, Duration::MAX);
        assert_eq!(config.cache_time, Duration::from_secs(5 * 60));
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_new_config() {
        let config = QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300))
            .with_retry(RetryPolicy::never());
        assert_eq!(config.stale_time, Duration::from_secs(30));
        assert_eq!(config.cache_time, Duration::from_secs(300));
        assert_eq!(config.retry, RetryPolicy::never());
    }

    #[rstest]
    #[case(1, QueryError::Network("down".to_string()), true)]
    #[case(2, QueryError::Network("down".to_string()), true)]
    #[case(3, QueryError::Network("down".to_string()), false)]
    #[case(1, QueryError::remote(500, json!({})), true)]
    #[case(1, QueryError::remote(404, json!({})), false)]
    #[case(1, QueryError::Unauthorized, false)]
    fn test_default_retry_policy(
        #[case] failures: u32,
        #[case] error: QueryError,
        #[case] expected: bool,
    ) {
        assert_eq!(RetryPolicy::default().should_retry(failures, &error), expected);
    }

    #[test]
    fn test_never_retry() {
        let err = QueryError::Network("down".to_string());
        assert!(!RetryPolicy::never().should_retry(1, &err));
    }
}
