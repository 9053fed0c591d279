//! In-memory residency cache for tile content.
//!
//! [`TileMemoryCache`] is the shared store that fetch workers write into
//! and the render thread reads from. It is backed by `moka::sync::Cache`,
//! which is safe for concurrent reads and writes without external locking,
//! and bounded by total content size.
//!
//! Level-0 tiles can optionally be retained outside the size bound so the
//! coarsest coverage of the globe is never evicted.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;

use crate::tile::TileKey;

/// Default cache size bound: 512 MiB.
pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Content held for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    data: Bytes,
    fetched_at: DateTime<Utc>,
}

impl CachedTile {
    pub fn new(data: Bytes, fetched_at: DateTime<Utc>) -> Self {
        Self { data, fetched_at }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// When the content was loaded into the cache.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub size_bytes: u64,
    pub retained_count: usize,
}

impl CacheStats {
    /// Fraction of lookups that found content, or 0.0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent, size-bounded store of tile content.
pub struct TileMemoryCache {
    cache: Cache<TileKey, CachedTile>,
    retained: DashMap<TileKey, CachedTile>,
    retain_level_zero: bool,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TileMemoryCache {
    /// Creates a cache bounded to `max_size_bytes` of content.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &TileKey, value: &CachedTile| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            retained: DashMap::new(),
            retain_level_zero: false,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Keeps level-0 content outside the eviction bound.
    pub fn with_retained_level_zero(mut self, retain: bool) -> Self {
        self.retain_level_zero = retain;
        self
    }

    pub fn retains_level_zero(&self) -> bool {
        self.retain_level_zero
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    fn is_retained(&self, key: &TileKey) -> bool {
        self.retain_level_zero && key.level() == 0
    }

    /// Stores content for `key`, stamped with the current time.
    pub fn insert(&self, key: TileKey, data: Bytes) {
        self.insert_at(key, data, Utc::now());
    }

    /// Stores content for `key` with an explicit fetch time.
    pub fn insert_at(&self, key: TileKey, data: Bytes, fetched_at: DateTime<Utc>) {
        let entry = CachedTile::new(data, fetched_at);
        if self.is_retained(&key) {
            self.retained.insert(key, entry);
        } else {
            self.cache.insert(key, entry);
        }
    }

    /// Returns the content for `key`, if resident.
    pub fn get(&self, key: &TileKey) -> Option<CachedTile> {
        let found = if self.is_retained(key) {
            self.retained.get(key).map(|entry| entry.value().clone())
        } else {
            self.cache.get(key)
        };

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns true if content for `key` is resident. Does not count as a
    /// lookup in the statistics.
    pub fn contains(&self, key: &TileKey) -> bool {
        if self.is_retained(key) {
            self.retained.contains_key(key)
        } else {
            self.cache.contains_key(key)
        }
    }

    /// Fetch time of the resident content for `key`.
    pub fn fetched_at(&self, key: &TileKey) -> Option<DateTime<Utc>> {
        if self.is_retained(key) {
            self.retained.get(key).map(|entry| entry.fetched_at())
        } else {
            self.cache.get(key).map(|entry| entry.fetched_at())
        }
    }

    pub fn remove(&self, key: &TileKey) -> Option<CachedTile> {
        if self.is_retained(key) {
            self.retained.remove(key).map(|(_, entry)| entry)
        } else {
            self.cache.remove(key)
        }
    }

    /// Number of resident tiles, including retained level-0 tiles.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count() + self.retained.len() as u64
    }

    /// Size of the evictable content in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entry_count(),
            size_bytes: self.size_bytes(),
            retained_count: self.retained.len(),
        }
    }

    /// Removes all content, including retained tiles.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        self.retained.clear();
    }
}

impl Default for TileMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE_BYTES)
    }
}

impl std::fmt::Debug for TileMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileMemoryCache")
            .field("max_size_bytes", &self.max_size_bytes)
            .field("retain_level_zero", &self.retain_level_zero)
            .field("retained", &self.retained.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(level: usize, row: i32) -> TileKey {
        TileKey::new(level, row, 0, format!("test/{level}"))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = TileMemoryCache::new(1024 * 1024);
        assert!(!cache.contains(&key(1, 0)));

        cache.insert(key(1, 0), Bytes::from_static(b"tile"));
        assert!(cache.contains(&key(1, 0)));
        assert_eq!(cache.get(&key(1, 0)).unwrap().data().as_ref(), b"tile");
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = TileMemoryCache::new(1024);
        cache.insert(key(1, 0), Bytes::from_static(b"a"));

        cache.get(&key(1, 0));
        cache.get(&key(1, 1));
        cache.get(&key(1, 2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fetch_time_is_recorded() {
        let cache = TileMemoryCache::new(1024);
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        cache.insert_at(key(2, 3), Bytes::from_static(b"x"), when);

        assert_eq!(cache.fetched_at(&key(2, 3)), Some(when));
        assert_eq!(cache.fetched_at(&key(2, 4)), None);
    }

    #[test]
    fn test_size_bound_evicts() {
        let cache = TileMemoryCache::new(100);
        for row in 0..10 {
            cache.insert(key(1, row), Bytes::from(vec![0u8; 40]));
        }
        assert!(cache.size_bytes() <= 100);
        assert!(cache.entry_count() < 10);
    }

    #[test]
    fn test_retained_level_zero_survives_pressure() {
        let cache = TileMemoryCache::new(50).with_retained_level_zero(true);
        cache.insert(key(0, 0), Bytes::from(vec![1u8; 40]));
        for row in 0..10 {
            cache.insert(key(1, row), Bytes::from(vec![0u8; 40]));
        }

        assert!(cache.contains(&key(0, 0)));
        assert_eq!(cache.stats().retained_count, 1);
        assert!(cache.size_bytes() <= 50);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TileMemoryCache::new(1024).with_retained_level_zero(true);
        cache.insert(key(0, 0), Bytes::from_static(b"a"));
        cache.insert(key(1, 0), Bytes::from_static(b"b"));

        assert!(cache.remove(&key(1, 0)).is_some());
        assert!(!cache.contains(&key(1, 0)));

        cache.clear();
        assert!(!cache.contains(&key(0, 0)));
        assert_eq!(cache.entry_count(), 0);
    }
}
