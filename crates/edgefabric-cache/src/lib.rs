//! edgefabric-cache — per-node key/value cache.
//!
//! Entries carry an absolute expiry. An expired entry is never returned:
//! reads delete it on sight, and inserts that would overflow
//! `max_entries` first sweep every expired entry, then drop the
//! oldest-inserted entries until there is room.
//!
//! Values are owned by one cache; replication between nodes copies them.

pub mod cache;

pub use cache::{CacheEntry, CacheStats, LocalCache};
