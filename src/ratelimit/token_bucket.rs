//! Token bucket limiter.
//!
//! Each key owns a bucket of up to `capacity` tokens that refills at
//! `refill_rate` tokens per second and pays one token per admitted event.
//! Refill is computed on access, so idle buckets cost nothing until touched.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::limiter::{retry_after_secs, BucketStatus, LimitResult, Limiter};
use super::rules::TokenBucketConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{AdmitError, Result};
use crate::store::{update_with, Bucket, MemoryStore, Store, StoredValue};

/// How long an untouched bucket is kept.
const BUCKET_TTL: Duration = Duration::from_secs(3600);

/// Admits bursts of up to `capacity` events and `refill_rate` events per
/// second over the long run.
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a limiter with its own in-memory store.
    pub fn new(capacity: u32, refill_rate: f64) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        Self::with_store(TokenBucketConfig::new(capacity, refill_rate), store, clock)
    }

    /// Create a limiter over a shared store.
    pub fn with_store(
        config: TokenBucketConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            clock,
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace(), key)
    }

    fn full_bucket(&self, now: u64) -> Bucket {
        Bucket {
            tokens: self.config.capacity as f64,
            last_refill: now,
        }
    }

    /// Credit whole tokens earned since the anchor.
    ///
    /// The anchor moves forward only by the time those whole tokens took to
    /// earn, so partial progress toward the next token survives frequent
    /// checks. A bucket that fills up re-anchors at `now`.
    fn refill(&self, bucket: &mut Bucket, now: u64) {
        let capacity = self.config.capacity as f64;
        let rate = self.config.refill_rate;

        // A bucket written under another capacity never exceeds this one.
        bucket.tokens = bucket.tokens.clamp(0.0, capacity);

        let elapsed_ms = now.saturating_sub(bucket.last_refill);
        let earned = (elapsed_ms as f64 / 1000.0 * rate).floor();
        if earned < 1.0 {
            return;
        }

        let tokens = bucket.tokens + earned;
        if tokens >= capacity {
            bucket.tokens = capacity;
            bucket.last_refill = now;
        } else {
            let paid_ms = (earned * 1000.0 / rate) as u64;
            bucket.tokens = tokens;
            bucket.last_refill = bucket.last_refill.saturating_add(paid_ms).min(now);
        }
    }

    fn evaluate(&self, bucket: &mut Bucket, now: u64, consume: bool) -> BucketStatus {
        self.refill(bucket, now);

        let capacity = self.config.capacity as f64;
        let rate = self.config.refill_rate;

        let allowed = bucket.tokens >= 1.0;
        if allowed && consume {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
        }

        let refill_time = if bucket.tokens >= capacity {
            now
        } else {
            let missing_ms = ((capacity - bucket.tokens) / rate * 1000.0).ceil() as u64;
            now.saturating_add(missing_ms)
        };

        let retry_after = if allowed {
            0
        } else {
            let token_ms = (1000.0 / rate).ceil() as u64;
            retry_after_secs(now, bucket.last_refill.saturating_add(token_ms))
        };

        BucketStatus {
            allowed,
            capacity: self.config.capacity,
            refill_rate: rate,
            tokens: bucket.tokens,
            refill_time,
            retry_after_secs: retry_after,
        }
    }
}

fn bucket_of(key: &str, value: Option<&StoredValue>) -> Result<Option<Bucket>> {
    match value {
        None => Ok(None),
        Some(StoredValue::Bucket(bucket)) => Ok(Some(*bucket)),
        Some(other) => Err(AdmitError::Store(format!(
            "key {} holds {:?}, expected a bucket",
            key, other
        ))),
    }
}

impl Limiter for TokenBucketLimiter {
    fn try_check_limit(&self, key: &str) -> Result<LimitResult> {
        let storage_key = self.storage_key(key);
        let now = self.clock.now_ms();

        trace!(key = %storage_key, now = now, "Checking token bucket");

        let status = update_with(self.store.as_ref(), &storage_key, |current| {
            let mut bucket = match bucket_of(&storage_key, current)? {
                Some(bucket) => bucket,
                None => {
                    debug!(
                        key = %storage_key,
                        capacity = self.config.capacity,
                        refill_rate = self.config.refill_rate,
                        "Creating new token bucket"
                    );
                    self.full_bucket(now)
                }
            };

            let status = self.evaluate(&mut bucket, now, true);
            Ok((status, Some((StoredValue::Bucket(bucket), Some(BUCKET_TTL)))))
        })?;

        if !status.allowed {
            debug!(
                key = %storage_key,
                capacity = status.capacity,
                retry_after_secs = status.retry_after_secs,
                "Token bucket empty"
            );
        }

        Ok(LimitResult::TokenBucket(status))
    }

    fn status(&self, key: &str) -> Result<LimitResult> {
        let storage_key = self.storage_key(key);
        let now = self.clock.now_ms();

        let current = self.store.get(&storage_key)?;
        let mut bucket =
            bucket_of(&storage_key, current.as_ref())?.unwrap_or_else(|| self.full_bucket(now));
        Ok(LimitResult::TokenBucket(
            self.evaluate(&mut bucket, now, false),
        ))
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.store.delete(&self.storage_key(key))?;
        Ok(())
    }
}
