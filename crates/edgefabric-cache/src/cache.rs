//! LocalCache — TTL cache with FIFO-with-expiry-sweep eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use edgefabric_core::CacheConfig;

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Live entries removed to make room.
    pub evictions: u64,
    /// Current number of stored entries, including expired ones not yet swept.
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// One stored value with its timing metadata.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    /// Absolute expiry. The entry is dead at and after this instant.
    pub expires_at: Instant,
    /// Microseconds after `created_at` of the latest read. Atomic so hits
    /// only need the shared lock.
    touched: AtomicU64,
    /// Insertion sequence, used for FIFO eviction.
    seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn last_access(&self) -> Instant {
        self.created_at + Duration::from_micros(self.touched.load(Ordering::Relaxed))
    }

    fn touch(&self, now: Instant) {
        let since = now.saturating_duration_since(self.created_at).as_micros();
        self.touched
            .fetch_max(u64::try_from(since).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            touched: AtomicU64::new(self.touched.load(Ordering::Relaxed)),
            seq: self.seq,
        }
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion sequence → key, oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect()
    }
}

/// Bounded per-node key/value cache.
pub struct LocalCache<V> {
    inner: RwLock<Inner<V>>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> LocalCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            config: CacheConfig {
                max_entries: config.max_entries.max(1),
                ..config
            },
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live value. An expired entry is deleted and reported as a miss.
    ///
    /// Hits take only the shared lock, so concurrent readers never wait on
    /// each other.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.touch(now);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired under the read lock. Re-check under the write lock since a
        // writer may have replaced the entry in between.
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.entries.get(key) {
            if !entry.is_expired(now) {
                entry.touch(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "expired entry removed on read");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Whether a live entry exists. Does not count as an access.
    pub async fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Insert with the configured default TTL.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.config.default_ttl;
        self.set_with_ttl(key, value, ttl).await;
    }

    /// Insert or replace `key`. A replaced key counts as a fresh insertion
    /// for eviction order.
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        self.insert(&mut inner, key.into(), value, ttl, now);
    }

    /// Replace `key` with the default TTL only while its live value still
    /// equals `expected`. Returns whether the write happened.
    pub async fn set_if(&self, key: &str, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let current = inner
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| &e.value);
        if current != Some(expected) {
            debug!(%key, "conditional write skipped, entry changed");
            return false;
        }
        self.insert(&mut inner, key.to_string(), value, self.config.default_ttl, now);
        true
    }

    pub async fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.write().await;
        inner.remove(key).map(|e| e.value)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        self.sweep_expired(&mut inner, now)
    }

    /// Keys of live entries, oldest insertion first.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner
            .order
            .values()
            .filter(|k| inner.entries.get(*k).is_some_and(|e| !e.is_expired(now)))
            .cloned()
            .collect()
    }

    /// Copy of every live `(key, value)` pair, oldest insertion first.
    pub async fn snapshot(&self) -> Vec<(String, V)> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner
            .order
            .values()
            .filter_map(|k| inner.entries.get(k))
            .filter(|e| !e.is_expired(now))
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Full entry including timing metadata, if live.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.entries.get(key).filter(|e| !e.is_expired(now)).cloned()
    }

    /// Stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len().await,
            max_entries: self.config.max_entries,
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn insert(&self, inner: &mut Inner<V>, key: String, value: V, ttl: Duration, now: Instant) {
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));

        if inner.remove(&key).is_none() && inner.entries.len() >= self.config.max_entries {
            self.make_room(inner, now);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                created_at: now,
                expires_at,
                touched: AtomicU64::new(0),
                seq,
            },
        );
    }

    fn sweep_expired(&self, inner: &mut Inner<V>, now: Instant) -> usize {
        let expired = inner.expired_keys(now);
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            self.expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(count = expired.len(), "expired entries swept");
        }
        expired.len()
    }

    /// Bring the cache below `max_entries` so one insert fits.
    fn make_room(&self, inner: &mut Inner<V>, now: Instant) {
        self.sweep_expired(inner, now);

        while inner.entries.len() >= self.config.max_entries {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %oldest, "evicted oldest entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn cache(max_entries: usize) -> LocalCache<String> {
        LocalCache::new(CacheConfig {
            max_entries,
            default_ttl: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn entry_visible_until_ttl_then_miss() {
        let cache = cache(8);
        cache
            .set_with_ttl("k", "v".to_string(), Duration::from_secs(1))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(1_100)).await;
        assert_eq!(cache.get("k").await, None);
        // Lazily deleted by the read.
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_exactly_at_ttl() {
        let cache = cache(8);
        cache
            .set_with_ttl("k", "v".to_string(), Duration::from_secs(1))
            .await;

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cache.contains("k").await);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.contains("k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies() {
        let cache = cache(8);
        cache.set("k", "v".to_string()).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").await.is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_inserted() {
        let cache = cache(2);
        cache.set("a", "1".to_string()).await;
        cache.set("b", "2".to_string()).await;
        // Reading does not protect an entry from FIFO eviction.
        assert!(cache.get("a").await.is_some());
        cache.set("c", "3".to_string()).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.keys().await, vec!["b", "c"]);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_sweeps_expired_before_evicting() {
        let cache = cache(3);
        cache.set("old", "1".to_string()).await;
        cache
            .set_with_ttl("short-a", "2".to_string(), Duration::from_secs(1))
            .await;
        cache
            .set_with_ttl("short-b", "3".to_string(), Duration::from_secs(1))
            .await;

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("new", "4".to_string()).await;

        // Both expired entries went; the oldest live one survived.
        assert_eq!(cache.keys().await, vec!["old", "new"]);
        let stats = cache.stats().await;
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn overwrite_refreshes_insertion_order() {
        let cache = cache(2);
        cache.set("a", "1".to_string()).await;
        cache.set("b", "2".to_string()).await;
        cache.set("a", "1b".to_string()).await;
        assert_eq!(cache.len().await, 2);

        cache.set("c", "3".to_string()).await;
        assert_eq!(cache.keys().await, vec!["a", "c"]);
        assert_eq!(cache.get("a").await.as_deref(), Some("1b"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_and_snapshot_skip_expired() {
        let cache = cache(8);
        cache.set("keep", "1".to_string()).await;
        cache
            .set_with_ttl("drop", "2".to_string(), Duration::from_millis(10))
            .await;
        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(
            cache.snapshot().await,
            vec![("keep".to_string(), "1".to_string())]
        );
        assert!(cache.entry("drop").await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_never_returned() {
        let cache = cache(8);
        cache.set_with_ttl("k", "v".to_string(), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = cache(8);
        cache.set("k", "v".to_string()).await;
        cache.get("k").await;
        cache.get("k").await;
        cache.get("nope").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn hits_proceed_while_another_reader_holds_the_lock() {
        let cache = cache(8);
        cache.set("k", "v".to_string()).await;
        tokio::time::advance(Duration::from_secs(3)).await;

        let held = cache.inner.read().await;
        let read = tokio::time::timeout(Duration::from_secs(1), cache.get("k")).await;
        drop(held);

        assert_eq!(read.unwrap().as_deref(), Some("v"));
        let entry = cache.entry("k").await.unwrap();
        assert_eq!(entry.last_access() - entry.created_at, Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_all_hit() {
        let cache = Arc::new(cache(8));
        cache.set("k", "v".to_string()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    assert_eq!(cache.get("k").await.as_deref(), Some("v"));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.stats().await.hits, 800);
    }

    #[tokio::test]
    async fn set_if_only_replaces_the_expected_value() {
        let cache = cache(8);
        cache.set("k", "old".to_string()).await;

        assert!(cache.set_if("k", &"old".to_string(), "mid".to_string()).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("mid"));

        // A stale expectation leaves the newer value alone.
        assert!(!cache.set_if("k", &"old".to_string(), "stale".to_string()).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("mid"));

        assert!(!cache.set_if("absent", &"old".to_string(), "x".to_string()).await);
        assert!(!cache.contains("absent").await);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_treats_expired_entry_as_absent() {
        let cache = cache(8);
        cache
            .set_with_ttl("k", "old".to_string(), Duration::from_secs(1))
            .await;
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(!cache.set_if("k", &"old".to_string(), "new".to_string()).await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn remove_returns_value() {
        let cache = cache(8);
        cache.set("k", "v".to_string()).await;
        assert_eq!(cache.remove("k").await.as_deref(), Some("v"));
        assert!(cache.is_empty().await);
        assert_eq!(cache.remove("k").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_respect_bound() {
        let cache = Arc::new(cache(16));
        let mut handles = Vec::new();
        for w in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    cache.set(format!("{w}-{i}"), i.to_string()).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(cache.len().await, 16);
        assert_eq!(cache.stats().await.evictions, 8 * 50 - 16);
    }
}
