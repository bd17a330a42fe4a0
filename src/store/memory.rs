//! In-memory store backed by a sharded concurrent map.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::backend::{Store, StoredValue, Write};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// A stored value and its absolute expiry.
#[derive(Debug, Clone)]
struct Slot {
    value: StoredValue,
    expires_at: Option<u64>,
}

impl Slot {
    fn new(value: StoredValue, ttl: Option<Duration>, now: u64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as u64)),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// An expiring key-value store held in process memory.
///
/// Expiry is a timestamp stamped on each entry, so re-setting a key replaces
/// its expiry in the same write. Expired entries are dropped lazily when
/// touched and eagerly by [`MemoryStore::purge_expired`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        let now = self.clock.now_ms();

        if let Some(slot) = self.entries.get(key) {
            if !slot.is_expired(now) {
                return Ok(Some(slot.value.clone()));
            }
        }

        // The read guard is released above; evict if it is still stale.
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        Ok(None)
    }

    fn set(&self, key: &str, value: StoredValue, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_ms();
        self.entries.insert(key.to_string(), Slot::new(value, ttl, now));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_ms();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn size(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&StoredValue>) -> Write) -> Result<()> {
        let now = self.clock.now_ms();

        // The entry guard holds the shard write lock for the whole closure.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let expired = occupied.get().is_expired(now);
                let current = if expired {
                    None
                } else {
                    Some(&occupied.get().value)
                };

                match f(current) {
                    Some((value, ttl)) => {
                        occupied.insert(Slot::new(value, ttl, now));
                    }
                    None if expired => {
                        occupied.remove();
                    }
                    None => {}
                }
            }
            Entry::Vacant(vacant) => {
                if let Some((value, ttl)) = f(None) {
                    trace!(key = %vacant.key(), "Creating store entry");
                    vacant.insert(Slot::new(value, ttl, now));
                }
            }
        }

        Ok(())
    }

    fn remove_matching(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        self.entries.retain(|key, slot| {
            if !predicate(key) {
                return true;
            }
            if !slot.is_expired(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }
}

/// Spawn a task that purges expired entries every `interval`.
///
/// The task runs until the returned handle is aborted or the runtime stops.
pub fn spawn_sweeper(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                debug!(removed = removed, "Purged expired store entries");
            }
        }
    })
}
