//! Limiter trait and check results shared by every algorithm.

use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Outcome of a sliding window check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowStatus {
    pub allowed: bool,
    /// Maximum events per window
    pub limit: u32,
    /// Events still admissible in the current window
    pub remaining: u32,
    /// When the oldest retained event leaves the window, epoch milliseconds
    pub reset_time: u64,
    /// Whole seconds until a denied caller may retry; zero when allowed
    pub retry_after_secs: u64,
}

/// Outcome of a token bucket check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    pub allowed: bool,
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Tokens left after this check
    pub tokens: f64,
    /// When the bucket is estimated to be full again, epoch milliseconds
    pub refill_time: u64,
    /// Whole seconds until the next token; zero when allowed
    pub retry_after_secs: u64,
}

/// Result of asking a limiter about a key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimitResult {
    SlidingWindow(WindowStatus),
    TokenBucket(BucketStatus),
    /// The store faulted; the caller is let through with no quota figures.
    Unavailable,
}

impl LimitResult {
    /// Whether the event may proceed.
    pub fn allowed(&self) -> bool {
        match self {
            LimitResult::SlidingWindow(status) => status.allowed,
            LimitResult::TokenBucket(status) => status.allowed,
            LimitResult::Unavailable => true,
        }
    }

    /// Seconds a denied caller should wait before retrying.
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            LimitResult::SlidingWindow(status) => status.retry_after_secs,
            LimitResult::TokenBucket(status) => status.retry_after_secs,
            LimitResult::Unavailable => 0,
        }
    }
}

/// Trait for rate limiter implementations.
///
/// All methods are synchronous and complete in bounded time. Calls for the
/// same key are serialized through the store, so concurrent checks never lose
/// an update.
pub trait Limiter: Send + Sync {
    /// Record one event for `key` if it is admissible.
    fn try_check_limit(&self, key: &str) -> Result<LimitResult>;

    /// Like [`Limiter::try_check_limit`] but never fails.
    ///
    /// A store fault yields [`LimitResult::Unavailable`], which admits the
    /// event. Availability of the guarded operation wins over strict
    /// enforcement while the store is down; keep this fail-open.
    fn check_limit(&self, key: &str) -> LimitResult {
        match self.try_check_limit(key) {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %key, error = %e, "Limiter unavailable, admitting request");
                LimitResult::Unavailable
            }
        }
    }

    /// Report the state of `key` without consuming quota.
    fn status(&self, key: &str) -> Result<LimitResult>;

    /// Forget everything recorded for `key`.
    fn clear(&self, key: &str) -> Result<()>;
}

/// Whole seconds from `now` until `at`, rounded up, at least one.
pub(crate) fn retry_after_secs(now: u64, at: u64) -> u64 {
    at.saturating_sub(now).div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdmitError;

    struct BrokenLimiter;

    impl Limiter for BrokenLimiter {
        fn try_check_limit(&self, _key: &str) -> Result<LimitResult> {
            Err(AdmitError::Store("connection refused".to_string()))
        }

        fn status(&self, _key: &str) -> Result<LimitResult> {
            Err(AdmitError::Store("connection refused".to_string()))
        }

        fn clear(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_check_limit_fails_open() {
        let result = BrokenLimiter.check_limit("ip-1");
        assert_eq!(result, LimitResult::Unavailable);
        assert!(result.allowed());
        assert_eq!(result.retry_after_secs(), 0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(0, 1), 1);
        assert_eq!(retry_after_secs(0, 1000), 1);
        assert_eq!(retry_after_secs(0, 1001), 2);
        // A reset already in the past still asks for one second.
        assert_eq!(retry_after_secs(5000, 1000), 1);
    }

    #[test]
    fn test_result_serializes_tagged() {
        let result = LimitResult::SlidingWindow(WindowStatus {
            allowed: true,
            limit: 5,
            remaining: 4,
            reset_time: 60_000,
            retry_after_secs: 0,
        });

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["algorithm"], "sliding_window");
        assert_eq!(json["remaining"], 4);
        assert_eq!(json["resetTime"], 60_000);
    }
}
