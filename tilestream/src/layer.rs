//! Layer driver: the per-frame cycle.
//!
//! A [`LayerDriver`] owns everything one streamed layer needs between
//! frames: the level hierarchy and its cached top-level tiles, the content
//! collaborator, the worker pool, the absent-resource list and the request
//! queue. Each call to [`LayerDriver::render`] runs one frame:
//!
//! ```text
//! 1. drain completed fetches      absent list updated
//! 2. assemble                     draw list + queued requests
//! 3. sort by effective level      coarse first
//! 4. draw                         fallback keys resolved to tiles
//! 5. check expiry                 re-fetch stale drawn tiles
//! 6. flush queue into pool        remainder discarded
//! ```
//!
//! Everything here runs on the render thread. Worker threads only touch
//! the content cache and report outcomes through the pool.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tilestream::content::{CachedTile, CachedTileContent, TileDrawer};
//! use tilestream::error::FetchError;
//! use tilestream::geo::{Globe, SphereGlobe};
//! use tilestream::layer::{LayerConfig, LayerDriver};
//! use tilestream::level::{HierarchyConfig, LevelHierarchy};
//! use tilestream::pool::TokioFetchPool;
//! use tilestream::tile::{TextureTransform, Tile};
//! use tilestream::view::{Frustum, View};
//!
//! struct NullDrawer;
//!
//! impl TileDrawer for NullDrawer {
//!     fn draw(&mut self, _tile: &Tile, _content: &CachedTile, _transform: TextureTransform) {}
//! }
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let pool = TokioFetchPool::new(runtime.handle().clone(), 8);
//!
//! let fetcher = |tile: &Tile| -> Result<Bytes, FetchError> {
//!     Ok(Bytes::from(tile.key().to_string()))
//! };
//! let config = LayerConfig::default().with_force_level_zero_loads(true);
//! let cache = Arc::new(config.memory_cache(64 * 1024 * 1024));
//! let content = CachedTileContent::new(cache, fetcher, NullDrawer);
//!
//! let hierarchy = LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(3)).unwrap();
//! let mut layer = LayerDriver::new("imagery", hierarchy, content, pool, config);
//!
//! let globe = SphereGlobe::earth();
//! let eye = globe.compute_point(0.0, 0.0, 5.0 * globe.radius());
//! let view = View::new(eye, Frustum::unbounded());
//!
//! let stats = layer.render(&view, &globe, None);
//! assert_eq!(stats.drawn, 50);
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::absent::{AbsentConfig, AbsentResourceList};
use crate::assembler::{sort_draw_list, AssemblyContext, TileAssembler, DEFAULT_SPLIT_SCALE};
use crate::content::{TileContent, TileMemoryCache};
use crate::geo::{Globe, Sector};
use crate::level::LevelHierarchy;
use crate::request::{RequestOrder, RequestQueue, WorkerPool, DEFAULT_QUEUE_CAPACITY};
use crate::tile::{Tile, TileKey};
use crate::view::View;

// =============================================================================
// Configuration
// =============================================================================

/// Presentational overlays. None of these affect tile selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub tile_outlines: bool,
    pub tile_ids: bool,
    pub bounding_volumes: bool,
}

impl Diagnostics {
    /// True if any overlay is enabled.
    pub fn any(&self) -> bool {
        self.tile_outlines || self.tile_ids || self.bounding_volumes
    }
}

/// Configuration for a streamed layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// LOD bias; higher values select finer levels.
    pub split_scale: f64,
    /// Load missing level-0 tiles synchronously during traversal.
    pub force_level_zero_loads: bool,
    /// Keep level-0 content out of cache eviction.
    pub retain_level_zero_tiles: bool,
    /// Expiry applied to every level, overriding per-level expiry.
    pub expiry_override: Option<DateTime<Utc>>,
    /// Maximum requests queued per frame.
    pub queue_capacity: usize,
    /// Dispatch order for queued requests.
    pub request_order: RequestOrder,
    /// Policy for failed fetches.
    pub absent: AbsentConfig,
    pub diagnostics: Diagnostics,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            split_scale: DEFAULT_SPLIT_SCALE,
            force_level_zero_loads: false,
            retain_level_zero_tiles: false,
            expiry_override: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_order: RequestOrder::default(),
            absent: AbsentConfig::default(),
            diagnostics: Diagnostics::default(),
        }
    }
}

impl LayerConfig {
    pub fn with_split_scale(mut self, split_scale: f64) -> Self {
        self.split_scale = split_scale;
        self
    }

    pub fn with_force_level_zero_loads(mut self, force: bool) -> Self {
        self.force_level_zero_loads = force;
        self
    }

    pub fn with_retain_level_zero_tiles(mut self, retain: bool) -> Self {
        self.retain_level_zero_tiles = retain;
        self
    }

    pub fn with_expiry_override(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_override = Some(expiry);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_request_order(mut self, order: RequestOrder) -> Self {
        self.request_order = order;
        self
    }

    pub fn with_absent(mut self, absent: AbsentConfig) -> Self {
        self.absent = absent;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Creates a memory cache honouring `retain_level_zero_tiles`.
    pub fn memory_cache(&self, max_size_bytes: u64) -> TileMemoryCache {
        TileMemoryCache::new(max_size_bytes).with_retained_level_zero(self.retain_level_zero_tiles)
    }
}

// =============================================================================
// Frame Statistics
// =============================================================================

/// What happened during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Tiles drawn.
    pub drawn: usize,
    /// Tiles drawn with ancestor content.
    pub with_fallback: usize,
    /// Selected tiles not drawn for lack of any resident content.
    pub omitted: usize,
    /// Tiles pruned by visibility.
    pub culled: usize,
    /// Synchronous level-0 loads attempted.
    pub forced_loads: usize,
    /// Requests added to the queue.
    pub requested: usize,
    /// Requests dropped because the queue was full.
    pub dropped: usize,
    /// Requests accepted by the pool.
    pub dispatched: usize,
    /// Requests skipped because the same tile was already in flight.
    pub in_flight: usize,
    /// Requests discarded because the pool was full.
    pub discarded: usize,
    /// Drawn tiles found expired and re-requested.
    pub expired: usize,
    /// Fetch outcomes applied at frame start.
    pub completions: usize,
    /// Of those, how many failed.
    pub failures: usize,
}

// =============================================================================
// Driver
// =============================================================================

/// Runs the frame cycle for one layer.
pub struct LayerDriver<C, P> {
    name: String,
    hierarchy: LevelHierarchy,
    top_level_tiles: Vec<Tile>,
    assembler: TileAssembler,
    content: C,
    pool: P,
    absent: AbsentResourceList,
    queue: RequestQueue,
    config: LayerConfig,
    last_draw_list: Vec<Tile>,
    frame: u64,
}

impl<C, P> LayerDriver<C, P>
where
    C: TileContent,
    P: WorkerPool,
{
    /// Creates a driver. The top-level tiles are computed once here.
    pub fn new(
        name: impl Into<String>,
        hierarchy: LevelHierarchy,
        content: C,
        pool: P,
        config: LayerConfig,
    ) -> Self {
        let name = name.into();
        let top_level_tiles = hierarchy.top_level_tiles();
        let assembler = TileAssembler::new(config.split_scale)
            .with_force_level_zero_loads(config.force_level_zero_loads);

        tracing::info!(
            layer = %name,
            levels = hierarchy.num_levels(),
            top_level_tiles = top_level_tiles.len(),
            split_scale = config.split_scale,
            force_level_zero_loads = config.force_level_zero_loads,
            retain_level_zero_tiles = config.retain_level_zero_tiles,
            queue_capacity = config.queue_capacity,
            order = ?config.request_order,
            "Layer created"
        );

        Self {
            name,
            absent: AbsentResourceList::new(config.absent),
            queue: RequestQueue::new(config.queue_capacity, config.request_order.clone()),
            hierarchy,
            top_level_tiles,
            assembler,
            content,
            pool,
            config,
            last_draw_list: Vec::new(),
            frame: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hierarchy(&self) -> &LevelHierarchy {
        &self.hierarchy
    }

    pub fn top_level_tiles(&self) -> &[Tile] {
        &self.top_level_tiles
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut C {
        &mut self.content
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn absent(&self) -> &AbsentResourceList {
        &self.absent
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Tiles drawn by the most recent frame, in draw order.
    pub fn last_draw_list(&self) -> &[Tile] {
        &self.last_draw_list
    }

    /// Number of frames rendered.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn set_split_scale(&mut self, split_scale: f64) {
        self.config.split_scale = split_scale;
        self.assembler.set_split_scale(split_scale);
    }

    pub fn set_diagnostics(&mut self, diagnostics: Diagnostics) {
        self.config.diagnostics = diagnostics;
    }

    pub fn set_expiry_override(&mut self, expiry: Option<DateTime<Utc>>) {
        self.config.expiry_override = expiry;
    }

    /// Marks everything loaded before now as stale.
    ///
    /// Drawn tiles are re-requested as they come into view.
    pub fn refresh_now(&mut self) {
        let now = Utc::now();
        tracing::info!(layer = %self.name, expiry = %now, "Layer refresh requested");
        self.config.expiry_override = Some(now);
    }

    /// Runs one frame.
    pub fn render(
        &mut self,
        view: &View,
        globe: &dyn Globe,
        visible_region: Option<Sector>,
    ) -> FrameStats {
        self.frame += 1;
        let mut stats = FrameStats {
            frame: self.frame,
            ..FrameStats::default()
        };

        self.apply_completions(&mut stats);

        let mut ctx = AssemblyContext {
            hierarchy: &self.hierarchy,
            content: &self.content,
            view,
            globe,
            visible_region,
            absent: &mut self.absent,
            queue: &mut self.queue,
        };
        let assembly = self.assembler.assemble(&mut ctx, &self.top_level_tiles);

        stats.culled = assembly.stats.culled;
        stats.omitted = assembly.stats.omitted;
        stats.forced_loads = assembly.stats.forced_loads;
        stats.requested = assembly.stats.requested;

        let mut draw_list = assembly.draw_list;
        sort_draw_list(&mut draw_list);

        self.draw(&draw_list, &mut stats);
        self.check_expiry(&draw_list, &mut stats);

        let dispatch = self.queue.flush(&self.pool);
        stats.dispatched = dispatch.dispatched;
        stats.in_flight = dispatch.in_flight;
        stats.discarded = dispatch.discarded;
        stats.dropped = dispatch.overflowed;

        self.last_draw_list = draw_list;

        tracing::debug!(
            layer = %self.name,
            frame = stats.frame,
            drawn = stats.drawn,
            fallback = stats.with_fallback,
            omitted = stats.omitted,
            requested = stats.requested,
            dispatched = stats.dispatched,
            discarded = stats.discarded,
            expired = stats.expired,
            completions = stats.completions,
            "Frame rendered"
        );

        stats
    }

    fn apply_completions(&mut self, stats: &mut FrameStats) {
        for outcome in self.pool.drain_completed() {
            stats.completions += 1;
            match outcome.result {
                Ok(()) => {
                    self.absent.unmark(&outcome.key);
                }
                Err(e) => {
                    stats.failures += 1;
                    self.absent.mark_absent(&outcome.key);
                    tracing::debug!(
                        layer = %self.name,
                        key = %outcome.key,
                        tries = self.absent.tries(&outcome.key),
                        error = %e,
                        "Marked tile absent"
                    );
                }
            }
        }
    }

    fn draw(&mut self, draw_list: &[Tile], stats: &mut FrameStats) {
        let diagnostics = self.config.diagnostics;
        for tile in draw_list {
            let fallback = tile.fallback().and_then(|key| self.resolve(key));
            if tile.fallback().is_some() {
                if fallback.is_none() {
                    continue;
                }
                stats.with_fallback += 1;
            }

            self.content.draw(tile, fallback.as_ref());
            if diagnostics.any() {
                self.content.draw_diagnostics(tile, &diagnostics);
            }
            stats.drawn += 1;
        }
    }

    fn resolve(&self, key: &TileKey) -> Option<Tile> {
        match self.hierarchy.tile_for_key(key) {
            Ok(tile) => Some(tile),
            Err(e) => {
                tracing::warn!(layer = %self.name, key = %key, error = %e, "Unresolvable fallback");
                None
            }
        }
    }

    /// Re-requests drawn tiles whose content predates the applicable expiry.
    fn check_expiry(&mut self, draw_list: &[Tile], stats: &mut FrameStats) {
        let now = Utc::now();
        let mut seen = HashSet::new();

        for tile in draw_list {
            let Some(expiry) = self.config.expiry_override.or(tile.level().expiry()) else {
                continue;
            };
            if expiry > now {
                continue;
            }
            let Some(timestamp) = self.content.content_timestamp(tile) else {
                continue;
            };
            if timestamp < expiry && seen.insert(tile.key().clone()) {
                tracing::trace!(key = %tile.key(), %timestamp, %expiry, "Tile expired");
                self.queue.offer(self.content.enqueue_fetch(tile));
                stats.expired += 1;
            }
        }
    }
}

impl<C, P> std::fmt::Debug for LayerDriver<C, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerDriver")
            .field("name", &self.name)
            .field("frame", &self.frame)
            .field("top_level_tiles", &self.top_level_tiles.len())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::geo::SphereGlobe;
    use crate::level::HierarchyConfig;
    use crate::request::{FetchOutcome, FetchTask, SubmitStatus};
    use crate::view::Frustum;
    use chrono::Duration;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Content with explicit residency and timestamps.
    #[derive(Default)]
    struct TestContent {
        resident: HashMap<TileKey, DateTime<Utc>>,
        drawn: Vec<(TileKey, Option<TileKey>)>,
        overlays: usize,
    }

    impl TileContent for TestContent {
        fn is_resident(&self, tile: &Tile) -> bool {
            self.resident.contains_key(tile.key())
        }

        fn force_synchronous_load(&self, tile: &Tile) -> Result<(), FetchError> {
            Err(FetchError::NotFound(tile.key().to_string()))
        }

        fn enqueue_fetch(&self, tile: &Tile) -> FetchTask {
            FetchTask::new(tile.key().clone(), || Ok(()))
        }

        fn draw(&mut self, tile: &Tile, fallback: Option<&Tile>) {
            self.drawn
                .push((tile.key().clone(), fallback.map(|f| f.key().clone())));
        }

        fn content_timestamp(&self, tile: &Tile) -> Option<DateTime<Utc>> {
            self.resident.get(tile.key()).copied()
        }

        fn draw_diagnostics(&mut self, _tile: &Tile, _diagnostics: &Diagnostics) {
            self.overlays += 1;
        }
    }

    /// Pool that records submissions and hands back queued outcomes.
    #[derive(Default)]
    struct ManualPool {
        submitted: Mutex<Vec<TileKey>>,
        outcomes: Mutex<Vec<FetchOutcome>>,
    }

    impl WorkerPool for ManualPool {
        fn is_full(&self) -> bool {
            false
        }

        fn submit(&self, task: FetchTask) -> SubmitStatus {
            self.submitted.lock().push(task.key().clone());
            SubmitStatus::Accepted
        }

        fn drain_completed(&self) -> Vec<FetchOutcome> {
            std::mem::take(&mut *self.outcomes.lock())
        }
    }

    fn hierarchy(config: HierarchyConfig) -> LevelHierarchy {
        LevelHierarchy::new(&config.with_num_levels(3)).unwrap()
    }

    fn far_view(globe: &SphereGlobe) -> View {
        View::new(
            globe.compute_point(0.0, 0.0, 5.0 * globe.radius()),
            Frustum::unbounded(),
        )
    }

    fn resident_top_level(h: &LevelHierarchy, when: DateTime<Utc>) -> TestContent {
        TestContent {
            resident: h
                .top_level_tiles()
                .into_iter()
                .map(|t| (t.key().clone(), when))
                .collect(),
            ..TestContent::default()
        }
    }

    #[test]
    fn test_render_draws_resident_top_level() {
        let h = hierarchy(HierarchyConfig::default());
        let content = resident_top_level(&h, Utc::now());
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();

        let stats = layer.render(&far_view(&globe), &globe, None);

        assert_eq!(stats.frame, 1);
        assert_eq!(stats.drawn, 50);
        assert_eq!(stats.requested, 0);
        assert_eq!(layer.last_draw_list().len(), 50);
        assert_eq!(layer.content().drawn.len(), 50);
        assert!(layer.pool().submitted.lock().is_empty());
    }

    #[test]
    fn test_render_dispatches_requests_for_missing_tiles() {
        let h = hierarchy(HierarchyConfig::default());
        let mut layer = LayerDriver::new(
            "test",
            h,
            TestContent::default(),
            ManualPool::default(),
            LayerConfig::default(),
        );
        let globe = SphereGlobe::earth();

        let stats = layer.render(&far_view(&globe), &globe, None);

        assert_eq!(stats.drawn, 0);
        assert_eq!(stats.omitted, 50);
        assert_eq!(stats.dispatched, 50);
        assert!(layer.queue().is_empty());
    }

    #[test]
    fn test_completions_update_absent_list() {
        let h = hierarchy(HierarchyConfig::default());
        let key = h.top_level_tiles()[0].key().clone();
        let mut layer = LayerDriver::new(
            "test",
            h,
            TestContent::default(),
            ManualPool::default(),
            LayerConfig::default(),
        );
        let globe = SphereGlobe::earth();

        layer.pool().outcomes.lock().push(FetchOutcome {
            key: key.clone(),
            result: Err(FetchError::NotFound("gone".into())),
        });
        let stats = layer.render(&far_view(&globe), &globe, None);
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(layer.absent().tries(&key), 1);

        layer.pool().outcomes.lock().push(FetchOutcome {
            key: key.clone(),
            result: Ok(()),
        });
        layer.render(&far_view(&globe), &globe, None);
        assert_eq!(layer.absent().tries(&key), 0);
    }

    #[test]
    fn test_expired_content_is_refetched() {
        let h = hierarchy(HierarchyConfig::default());
        let loaded = Utc::now() - Duration::hours(2);
        let content = resident_top_level(&h, loaded);
        let config = LayerConfig::default().with_expiry_override(Utc::now() - Duration::hours(1));
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), config);
        let globe = SphereGlobe::earth();

        let stats = layer.render(&far_view(&globe), &globe, None);

        assert_eq!(stats.drawn, 50);
        assert_eq!(stats.expired, 50);
        assert_eq!(layer.pool().submitted.lock().len(), 50);
    }

    #[test]
    fn test_future_expiry_does_not_apply() {
        let h = hierarchy(HierarchyConfig::default().with_expiry(Utc::now() + Duration::hours(1)));
        let content = resident_top_level(&h, Utc::now() - Duration::days(1));
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();

        assert_eq!(layer.render(&far_view(&globe), &globe, None).expired, 0);
    }

    #[test]
    fn test_level_expiry_applies_without_override() {
        let h = hierarchy(HierarchyConfig::default().with_level_expiry(0, Utc::now() - Duration::minutes(5)));
        let content = resident_top_level(&h, Utc::now() - Duration::hours(1));
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();

        assert_eq!(layer.render(&far_view(&globe), &globe, None).expired, 50);
    }

    #[test]
    fn test_refresh_now_expires_loaded_content() {
        let h = hierarchy(HierarchyConfig::default());
        let content = resident_top_level(&h, Utc::now() - Duration::seconds(30));
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();

        assert_eq!(layer.render(&far_view(&globe), &globe, None).expired, 0);
        layer.refresh_now();
        assert_eq!(layer.render(&far_view(&globe), &globe, None).expired, 50);
    }

    #[test]
    fn test_diagnostics_drawn_when_enabled() {
        let h = hierarchy(HierarchyConfig::default());
        let content = resident_top_level(&h, Utc::now());
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();

        layer.render(&far_view(&globe), &globe, None);
        assert_eq!(layer.content().overlays, 0);

        layer.set_diagnostics(Diagnostics {
            tile_ids: true,
            ..Diagnostics::default()
        });
        layer.render(&far_view(&globe), &globe, None);
        assert_eq!(layer.content().overlays, 50);
    }

    #[test]
    fn test_visible_region_limits_draw_list() {
        let h = hierarchy(HierarchyConfig::default());
        let content = resident_top_level(&h, Utc::now());
        let mut layer = LayerDriver::new("test", h, content, ManualPool::default(), LayerConfig::default());
        let globe = SphereGlobe::earth();
        let region = Sector::new(1.0, 17.0, 1.0, 35.0).unwrap();

        let stats = layer.render(&far_view(&globe), &globe, Some(region));

        assert_eq!(stats.drawn, 1);
        assert_eq!(stats.culled, 49);
    }

    #[test]
    fn test_memory_cache_honours_retention() {
        let config = LayerConfig::default().with_retain_level_zero_tiles(true);
        assert!(config.memory_cache(1024).retains_level_zero());
        assert!(!LayerConfig::default().memory_cache(1024).retains_level_zero());
    }
}
