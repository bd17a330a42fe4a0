//! Store trait for abstracting the in-memory map and networked backends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AdmitError, Result};

/// Token bucket state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Tokens currently available, never above the limiter's capacity
    pub tokens: f64,
    /// Refill anchor in epoch milliseconds
    pub last_refill: u64,
}

/// A value held by a [`Store`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    /// Admitted event timestamps of a sliding window, oldest first
    Window(Vec<u64>),
    /// Token bucket state
    Bucket(Bucket),
}

/// Outcome of an [`Store::update`] closure: the value to write and its TTL,
/// or `None` to leave the entry as it was.
pub type Write = Option<(StoredValue, Option<Duration>)>;

/// Trait for expiring key-value stores.
///
/// Values go in and come out by clone; callers never hold a reference into
/// the store. An expired entry is never returned.
///
/// The in-memory implementation is [`MemoryStore`](super::MemoryStore). A
/// networked backend implements [`Store::update`] with compare-and-swap or a
/// server-side script; the limiters do not change.
pub trait Store: Send + Sync {
    /// Read the live value for `key`.
    fn get(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Write `value`, replacing any previous value and expiry.
    fn set(&self, key: &str, value: StoredValue, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`. Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    /// Number of live entries.
    fn size(&self) -> Result<usize>;

    /// Atomically read, transform and write one key.
    ///
    /// No other operation on `key` interleaves with `f`.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&StoredValue>) -> Write) -> Result<()>;

    /// Remove every entry whose key satisfies `predicate`.
    fn remove_matching(&self, predicate: &dyn Fn(&str) -> bool) -> Result<usize>;
}

/// Run a fallible transform under [`Store::update`] and return what it
/// computed. An error from `f` leaves the entry untouched.
pub fn update_with<T>(
    store: &dyn Store,
    key: &str,
    mut f: impl FnMut(Option<&StoredValue>) -> Result<(T, Write)>,
) -> Result<T> {
    let mut outcome = None;
    store.update(key, &mut |current| match f(current) {
        Ok((value, write)) => {
            outcome = Some(Ok(value));
            write
        }
        Err(e) => {
            outcome = Some(Err(e));
            None
        }
    })?;
    outcome.unwrap_or_else(|| Err(AdmitError::Store(format!("update of {} did not run", key))))
}
