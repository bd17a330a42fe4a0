//! Administrative operations over a shared store.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::limiter::LimitResult;
use super::rules::LimiterConfig;
use crate::clock::Clock;
use crate::error::Result;
use crate::store::Store;

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Live entries across every limiter sharing the store
    pub store_size: usize,
}

/// Operator view of every limiter sharing one store.
#[derive(Clone)]
pub struct Admin {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Admin {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Remove the state of `key` from every limiter namespace.
    ///
    /// Returns the number of entries removed.
    pub fn clear_limits(&self, key: &str) -> Result<usize> {
        let removed = self.store.remove_matching(&|stored: &str| {
            stored
                .split_once(':')
                .is_some_and(|(_, caller)| caller == key)
        })?;
        info!(key = %key, removed = removed, "Cleared rate limits");
        Ok(removed)
    }

    /// Probe `key` under `config` without consuming quota.
    pub fn get_status(&self, key: &str, config: &LimiterConfig) -> Result<LimitResult> {
        config
            .build(self.store.clone(), self.clock.clone())?
            .status(key)
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            store_size: self.store.size()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::Preset;
    use crate::store::MemoryStore;

    fn test_admin() -> (Arc<dyn Store>, Arc<dyn Clock>, Admin) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(clock.clone()));
        let admin = Admin::new(store.clone(), clock.clone());
        (store, clock, admin)
    }

    #[test]
    fn test_clear_limits_across_namespaces() {
        let (store, clock, admin) = test_admin();
        let auth = Preset::Auth.config().build(store.clone(), clock.clone()).unwrap();
        let search = Preset::Search.config().build(store.clone(), clock.clone()).unwrap();

        auth.check_limit("ip-1");
        search.check_limit("ip-1");
        search.check_limit("ip-2");
        assert_eq!(admin.stats().unwrap().store_size, 3);

        assert_eq!(admin.clear_limits("ip-1").unwrap(), 2);
        assert_eq!(admin.stats().unwrap().store_size, 1);
    }

    #[test]
    fn test_clear_limits_matches_whole_key() {
        let (store, clock, admin) = test_admin();
        let api = Preset::Api.config().build(store, clock).unwrap();
        api.check_limit("10.0.0.1:abcd1234");
        api.check_limit("abcd1234");

        assert_eq!(admin.clear_limits("abcd1234").unwrap(), 1);
        assert_eq!(admin.clear_limits("10.0.0.1:abcd1234").unwrap(), 1);
    }

    #[test]
    fn test_get_status_is_read_only() {
        let (store, clock, admin) = test_admin();
        let config = Preset::Auth.config();
        let auth = config.build(store, clock).unwrap();
        auth.check_limit("ip-1");

        for _ in 0..10 {
            match admin.get_status("ip-1", &config).unwrap() {
                LimitResult::SlidingWindow(status) => {
                    assert!(status.allowed);
                    assert_eq!(status.remaining, 4);
                }
                other => panic!("unexpected status: {:?}", other),
            }
        }
        assert_eq!(admin.stats().unwrap().store_size, 1);
    }

    #[test]
    fn test_get_status_rejects_invalid_config() {
        let (_, _, admin) = test_admin();
        let config = LimiterConfig::SlidingWindow(crate::ratelimit::SlidingWindowConfig::new(0, 1));
        assert!(admin.get_status("k", &config).is_err());
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(Stats { store_size: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({ "storeSize": 7 }));
    }
}
