//! Expiring key-value storage shared by the limiters.

mod backend;
mod memory;

pub use backend::{update_with, Bucket, Store, StoredValue, Write};
pub use memory::{spawn_sweeper, MemoryStore};
