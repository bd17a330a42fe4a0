//! Exact sliding window limiter.
//!
//! Every admitted event's timestamp is kept until it falls out of the
//! trailing window, so there is no burst at window boundaries. Work per check
//! is bounded by `max_requests`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::limiter::{retry_after_secs, LimitResult, Limiter, WindowStatus};
use super::rules::SlidingWindowConfig;
use crate::clock::{Clock, SystemClock};
use crate::error::{AdmitError, Result};
use crate::store::{update_with, MemoryStore, Store, StoredValue};

/// Admits at most `max_requests` events per key in any `window_ms` span.
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with its own in-memory store.
    pub fn new(window_ms: u64, max_requests: u32) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        Self::with_store(
            SlidingWindowConfig::new(window_ms, max_requests),
            store,
            clock,
        )
    }

    /// Create a limiter over a shared store.
    pub fn with_store(
        config: SlidingWindowConfig,
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

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace(), key)
    }

    /// Drop events that have left the window ending at `now`.
    fn prune(&self, stamps: &mut Vec<u64>, now: u64) {
        let window = self.config.window_ms;
        // `t <= now - window`, rearranged so that it cannot underflow.
        stamps.retain(|&t| t.saturating_add(window) > now);
    }

    /// Evaluate `stamps` at `now`, recording an event when `consume` is set
    /// and the event is admissible.
    fn evaluate(&self, stamps: &mut Vec<u64>, now: u64, consume: bool) -> WindowStatus {
        self.prune(stamps, now);

        let limit = self.config.max_requests;
        let allowed = stamps.len() < limit as usize;
        if allowed && consume {
            // Never step backwards, even if the clock did.
            let at = stamps.last().map_or(now, |&last| last.max(now));
            stamps.push(at);
        }

        let remaining = (limit as usize).saturating_sub(stamps.len()) as u32;
        let reset_time = stamps
            .first()
            .map_or(now, |&oldest| oldest)
            .saturating_add(self.config.window_ms);

        WindowStatus {
            allowed,
            limit,
            remaining,
            reset_time,
            retry_after_secs: if allowed {
                0
            } else {
                retry_after_secs(now, reset_time)
            },
        }
    }
}

fn window_of(key: &str, value: Option<&StoredValue>) -> Result<Vec<u64>> {
    match value {
        None => Ok(Vec::new()),
        Some(StoredValue::Window(stamps)) => Ok(stamps.clone()),
        Some(other) => Err(AdmitError::Store(format!(
            "key {} holds {:?}, expected a window",
            key, other
        ))),
    }
}

impl Limiter for SlidingWindowLimiter {
    fn try_check_limit(&self, key: &str) -> Result<LimitResult> {
        let storage_key = self.storage_key(key);
        let now = self.clock.now_ms();
        let window = self.config.window_ms;

        trace!(key = %storage_key, now = now, "Checking sliding window");

        let status = update_with(self.store.as_ref(), &storage_key, |current| {
            let mut stamps = window_of(&storage_key, current)?;
            let status = self.evaluate(&mut stamps, now, true);
            if !status.allowed {
                return Ok((status, None));
            }

            // Live until the newest event leaves the window, which is later
            // than `now + window` when the clock has stepped back.
            let newest = stamps.last().map_or(now, |&last| last.max(now));
            let ttl = Duration::from_millis(newest.saturating_add(window).saturating_sub(now));
            Ok((status, Some((StoredValue::Window(stamps), Some(ttl)))))
        })?;

        if !status.allowed {
            debug!(
                key = %storage_key,
                limit = status.limit,
                reset_time = status.reset_time,
                "Sliding window limit exceeded"
            );
        }

        Ok(LimitResult::SlidingWindow(status))
    }

    fn status(&self, key: &str) -> Result<LimitResult> {
        let storage_key = self.storage_key(key);
        let now = self.clock.now_ms();

        let current = self.store.get(&storage_key)?;
        let mut stamps = window_of(&storage_key, current.as_ref())?;
        Ok(LimitResult::SlidingWindow(
            self.evaluate(&mut stamps, now, false),
        ))
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.store.delete(&self.storage_key(key))?;
        Ok(())
    }
}
