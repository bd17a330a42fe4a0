//! Limiter configuration and validation.
//!
//! A [`LimiterConfig`] is an immutable description of one limiter. It is
//! validated once, when the limiter is built; a limiter never re-reads or
//! mutates it. A new configuration means a new limiter.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::limiter::Limiter;
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::clock::Clock;
use crate::error::{AdmitError, Result};
use crate::store::Store;

/// Default store namespace of sliding window limiters.
pub const SLIDING_WINDOW_NAMESPACE: &str = "sliding_window";
/// Default store namespace of token bucket limiters.
pub const TOKEN_BUCKET_NAMESPACE: &str = "token_bucket";

/// Parameters of a sliding window limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Events admitted per window
    pub max_requests: u32,
    /// Prefix for store keys
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Parameters of a token bucket limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum tokens held
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
    /// Prefix for store keys
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Configuration of any supported limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LimiterConfig {
    SlidingWindow(SlidingWindowConfig),
    TokenBucket(TokenBucketConfig),
}

impl SlidingWindowConfig {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
            namespace: None,
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(SLIDING_WINDOW_NAMESPACE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(AdmitError::Config("window_ms must be positive".to_string()));
        }
        if self.max_requests == 0 {
            return Err(AdmitError::Config(
                "max_requests must be positive".to_string(),
            ));
        }
        validate_namespace(self.namespace())
    }
}

impl TokenBucketConfig {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            namespace: None,
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(TOKEN_BUCKET_NAMESPACE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(AdmitError::Config("capacity must be positive".to_string()));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(AdmitError::Config(format!(
                "refill_rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        validate_namespace(self.namespace())
    }
}

impl LimiterConfig {
    /// Check every parameter.
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterConfig::SlidingWindow(config) => config.validate(),
            LimiterConfig::TokenBucket(config) => config.validate(),
        }
    }

    /// Prefix of this limiter's store keys.
    pub fn namespace(&self) -> &str {
        match self {
            LimiterConfig::SlidingWindow(config) => config.namespace(),
            LimiterConfig::TokenBucket(config) => config.namespace(),
        }
    }

    /// The same configuration under another store namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = Some(namespace.into());
        match &mut self {
            LimiterConfig::SlidingWindow(config) => config.namespace = namespace,
            LimiterConfig::TokenBucket(config) => config.namespace = namespace,
        }
        self
    }

    /// Build a limiter over a shared store.
    pub fn build(&self, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Result<Arc<dyn Limiter>> {
        let limiter: Arc<dyn Limiter> = match self {
            LimiterConfig::SlidingWindow(config) => Arc::new(SlidingWindowLimiter::with_store(
                config.clone(),
                store,
                clock,
            )?),
            LimiterConfig::TokenBucket(config) => Arc::new(TokenBucketLimiter::with_store(
                config.clone(),
                store,
                clock,
            )?),
        };
        Ok(limiter)
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace.contains(':') {
        return Err(AdmitError::Config(format!(
            "namespace must be non-empty and free of ':', got {:?}",
            namespace
        )));
    }
    Ok(())
}
