//! Resource-absent bookkeeping.
//!
//! When a fetch fails, the tile's key is marked absent so the assembler
//! does not request it again on every frame. A key is considered absent
//! when either:
//!
//! 1. it has failed `max_tries` times, or
//! 2. its last failure is more recent than `min_check_interval`.
//!
//! Entries whose last failure is older than `try_again_interval` are
//! forgotten, giving permanently failing regions an occasional retry. A
//! successful load clears the entry immediately.
//!
//! The list is backed by a `moka::sync::Cache` whose time-to-live is the
//! try-again interval and whose capacity is `max_entries`, so keys that
//! are never looked up again still age out and the list stays bounded as
//! the eye sweeps across failing regions.
//!
//! The list is owned by the layer driver and touched only from the render
//! thread; completions from worker threads are applied when the driver
//! drains them at the start of a frame.

use std::fmt;
use std::time::{Duration, Instant};

use moka::sync::Cache;

use crate::tile::TileKey;

/// Default number of failures after which a key stays absent.
pub const DEFAULT_MAX_ABSENT_TRIES: u32 = 2;

/// Default quiet period after any failure.
pub const DEFAULT_MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default age after which an absent entry is forgotten.
pub const DEFAULT_TRY_AGAIN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default bound on the number of keys tracked at once.
pub const DEFAULT_MAX_ABSENT_ENTRIES: u64 = 10_000;

/// moka rejects time-to-live values beyond 1000 years.
const MAX_ENTRY_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Policy for the absent-resource list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsentConfig {
    /// Failures before a key is treated as absent regardless of timing.
    pub max_tries: u32,
    /// Minimum time between retries of a failed key.
    pub min_check_interval: Duration,
    /// Age after which a failed key is retried from scratch.
    pub try_again_interval: Duration,
    /// Most keys remembered at once; the least useful are evicted first.
    pub max_entries: u64,
}

impl Default for AbsentConfig {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_ABSENT_TRIES,
            min_check_interval: DEFAULT_MIN_CHECK_INTERVAL,
            try_again_interval: DEFAULT_TRY_AGAIN_INTERVAL,
            max_entries: DEFAULT_MAX_ABSENT_ENTRIES,
        }
    }
}

impl AbsentConfig {
    pub fn with_max_tries(mut self, tries: u32) -> Self {
        self.max_tries = tries;
        self
    }

    pub fn with_min_check_interval(mut self, interval: Duration) -> Self {
        self.min_check_interval = interval;
        self
    }

    pub fn with_try_again_interval(mut self, interval: Duration) -> Self {
        self.try_again_interval = interval;
        self
    }

    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct AbsentEntry {
    tries: u32,
    last_failure: Instant,
}

/// Set of keys whose content recently failed to load.
pub struct AbsentResourceList {
    config: AbsentConfig,
    entries: Cache<TileKey, AbsentEntry>,
}

impl Default for AbsentResourceList {
    fn default() -> Self {
        Self::new(AbsentConfig::default())
    }
}

impl fmt::Debug for AbsentResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbsentResourceList")
            .field("config", &self.config)
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl AbsentResourceList {
    pub fn new(config: AbsentConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.try_again_interval.min(MAX_ENTRY_LIFETIME))
            .build();

        Self { config, entries }
    }

    pub fn config(&self) -> &AbsentConfig {
        &self.config
    }

    /// Records a failed load of `key`.
    pub fn mark_absent(&mut self, key: &TileKey) {
        self.mark_absent_at(key, Instant::now());
    }

    pub(crate) fn mark_absent_at(&mut self, key: &TileKey, now: Instant) {
        let tries = self.entries.get(key).map_or(0, |e| e.tries);
        // Re-inserting restarts the entry's time-to-live from this failure.
        self.entries.insert(
            key.clone(),
            AbsentEntry {
                tries: tries.saturating_add(1),
                last_failure: now,
            },
        );
    }

    /// Clears `key` after a successful load.
    pub fn unmark(&mut self, key: &TileKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Returns true if `key` should not be requested now.
    pub fn is_absent(&mut self, key: &TileKey) -> bool {
        self.is_absent_at(key, Instant::now())
    }

    pub(crate) fn is_absent_at(&mut self, key: &TileKey, now: Instant) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };

        let since = now.saturating_duration_since(entry.last_failure);
        if since > self.config.try_again_interval {
            self.entries.invalidate(key);
            return false;
        }

        entry.tries >= self.config.max_tries || since < self.config.min_check_interval
    }

    /// Number of failures recorded for `key`.
    pub fn tries(&self, key: &TileKey) -> u32 {
        self.entries.get(key).map_or(0, |e| e.tries)
    }

    /// Number of keys currently tracked, after pending evictions run.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }
}
