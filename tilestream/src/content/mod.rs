//! Content collaborators.
//!
//! The engine never touches tile content directly. It asks a [`TileContent`]
//! implementation four things: is a tile resident, load it now, give me a
//! fetch task for it, and draw it (possibly with an ancestor's content).
//! Imagery, vector and elevation layers all plug in through this one trait.
//!
//! [`CachedTileContent`] is the stock implementation: content bytes live in
//! a shared [`TileMemoryCache`], a [`TileFetcher`] loads them, and a
//! [`TileDrawer`] hands them to the host renderer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tilestream::content::{CachedTile, CachedTileContent, TileContent, TileDrawer, TileMemoryCache};
//! use tilestream::error::FetchError;
//! use tilestream::level::{HierarchyConfig, LevelHierarchy};
//! use tilestream::tile::{TextureTransform, Tile};
//!
//! struct CountingDrawer(usize);
//!
//! impl TileDrawer for CountingDrawer {
//!     fn draw(&mut self, _tile: &Tile, _content: &CachedTile, _transform: TextureTransform) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let fetcher = |tile: &Tile| -> Result<Bytes, FetchError> {
//!     Ok(Bytes::from(tile.key().to_string()))
//! };
//! let cache = Arc::new(TileMemoryCache::default());
//! let mut content = CachedTileContent::new(cache, fetcher, CountingDrawer(0));
//!
//! let hierarchy = LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(2)).unwrap();
//! let tile = hierarchy.create_tile(0, 0, 0).unwrap();
//!
//! content.force_synchronous_load(&tile).unwrap();
//! assert!(content.is_resident(&tile));
//!
//! content.draw(&tile, None);
//! assert_eq!(content.drawer().0, 1);
//! ```

mod cache;
mod fetcher;

pub use cache::{CacheStats, CachedTile, TileMemoryCache, DEFAULT_CACHE_SIZE_BYTES};
pub use fetcher::{DirectoryFetcher, TileFetcher};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::layer::Diagnostics;
use crate::request::FetchTask;
use crate::tile::{TextureTransform, Tile};

// =============================================================================
// Capability Trait
// =============================================================================

/// Per-content-type hooks the engine drives.
///
/// Residency queries and fetch-task creation run on the render thread and
/// must not block. `force_synchronous_load` is the one exception; it is only
/// called for level-0 tiles when forced loads are enabled.
pub trait TileContent {
    /// Returns true if `tile`'s own content is loaded.
    fn is_resident(&self, tile: &Tile) -> bool;

    /// Loads `tile`'s content on the calling thread.
    fn force_synchronous_load(&self, tile: &Tile) -> Result<(), FetchError>;

    /// Creates the task that loads `tile`'s content off the render thread.
    fn enqueue_fetch(&self, tile: &Tile) -> FetchTask;

    /// Draws `tile`, using `fallback`'s content cropped to `tile` if given.
    fn draw(&mut self, tile: &Tile, fallback: Option<&Tile>);

    /// When the resident content for `tile` was produced, if known.
    ///
    /// Used for expiry; content without a timestamp never expires.
    fn content_timestamp(&self, _tile: &Tile) -> Option<DateTime<Utc>> {
        None
    }

    /// Draws diagnostic overlays for a drawn tile.
    fn draw_diagnostics(&mut self, _tile: &Tile, _diagnostics: &Diagnostics) {}
}

// =============================================================================
// Cache-backed Content
// =============================================================================

/// Renderer hook for cache-backed content.
pub trait TileDrawer {
    /// Draws `content` over `tile`'s sector, sampling with `transform`.
    fn draw(&mut self, tile: &Tile, content: &CachedTile, transform: TextureTransform);

    /// Draws diagnostic overlays. No-op by default.
    fn draw_diagnostics(&mut self, _tile: &Tile, _diagnostics: &Diagnostics) {}
}

/// [`TileContent`] over a shared memory cache, a fetcher and a drawer.
pub struct CachedTileContent<F, D> {
    cache: Arc<TileMemoryCache>,
    fetcher: Arc<F>,
    drawer: D,
}

impl<F, D> CachedTileContent<F, D>
where
    F: TileFetcher,
    D: TileDrawer,
{
    pub fn new(cache: Arc<TileMemoryCache>, fetcher: F, drawer: D) -> Self {
        Self {
            cache,
            fetcher: Arc::new(fetcher),
            drawer,
        }
    }

    pub fn cache(&self) -> &Arc<TileMemoryCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn drawer(&self) -> &D {
        &self.drawer
    }

    pub fn drawer_mut(&mut self) -> &mut D {
        &mut self.drawer
    }
}

impl<F, D> TileContent for CachedTileContent<F, D>
where
    F: TileFetcher,
    D: TileDrawer,
{
    fn is_resident(&self, tile: &Tile) -> bool {
        self.cache.contains(tile.key())
    }

    fn force_synchronous_load(&self, tile: &Tile) -> Result<(), FetchError> {
        let data = self.fetcher.fetch(tile)?;
        self.cache.insert(tile.key().clone(), data);
        Ok(())
    }

    fn enqueue_fetch(&self, tile: &Tile) -> FetchTask {
        let cache = Arc::clone(&self.cache);
        let fetcher = Arc::clone(&self.fetcher);
        let target = tile.clone();

        FetchTask::new(tile.key().clone(), move || {
            let data = fetcher.fetch(&target)?;
            cache.insert(target.key().clone(), data);
            Ok(())
        })
    }

    fn draw(&mut self, tile: &Tile, fallback: Option<&Tile>) {
        let source = fallback.unwrap_or(tile);
        let Some(content) = self.cache.get(source.key()) else {
            // Evicted between selection and drawing.
            tracing::trace!(key = %source.key(), "Content vanished before draw");
            return;
        };

        let transform = match fallback {
            Some(ancestor) => tile.texture_transform(ancestor),
            None => TextureTransform::IDENTITY,
        };
        self.drawer.draw(tile, &content, transform);
    }

    fn content_timestamp(&self, tile: &Tile) -> Option<DateTime<Utc>> {
        self.cache.fetched_at(tile.key())
    }

    fn draw_diagnostics(&mut self, tile: &Tile, diagnostics: &Diagnostics) {
        self.drawer.draw_diagnostics(tile, diagnostics);
    }
}

impl<F, D> std::fmt::Debug for CachedTileContent<F, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTileContent")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{HierarchyConfig, LevelHierarchy};
    use bytes::Bytes;

    #[derive(Default)]
    struct RecordingDrawer {
        drawn: Vec<(String, Bytes, TextureTransform)>,
        outlines: usize,
    }

    impl TileDrawer for RecordingDrawer {
        fn draw(&mut self, tile: &Tile, content: &CachedTile, transform: TextureTransform) {
            self.drawn
                .push((tile.key().to_string(), content.data().clone(), transform));
        }

        fn draw_diagnostics(&mut self, _tile: &Tile, diagnostics: &Diagnostics) {
            if diagnostics.tile_outlines {
                self.outlines += 1;
            }
        }
    }

    fn hierarchy() -> LevelHierarchy {
        LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(3)).unwrap()
    }

    fn key_fetcher(tile: &Tile) -> Result<Bytes, FetchError> {
        Ok(Bytes::from(tile.key().to_string()))
    }

    type TestContent =
        CachedTileContent<fn(&Tile) -> Result<Bytes, FetchError>, RecordingDrawer>;

    fn content() -> TestContent {
        CachedTileContent::new(
            Arc::new(TileMemoryCache::new(1 << 20)),
            key_fetcher as fn(&Tile) -> Result<Bytes, FetchError>,
            RecordingDrawer::default(),
        )
    }

    #[test]
    fn test_fetch_task_populates_cache() {
        let content = content();
        let tile = hierarchy().create_tile(1, 4, 9).unwrap();
        assert!(!content.is_resident(&tile));

        let outcome = content.enqueue_fetch(&tile).run();
        assert!(outcome.is_success());
        assert!(content.is_resident(&tile));
        assert!(content.content_timestamp(&tile).is_some());
    }

    #[test]
    fn test_failed_fetch_leaves_tile_absent() {
        let failing = |_: &Tile| -> Result<Bytes, FetchError> {
            Err(FetchError::Decode("bad header".into()))
        };
        let content = CachedTileContent::new(
            Arc::new(TileMemoryCache::new(1 << 20)),
            failing,
            RecordingDrawer::default(),
        );
        let tile = hierarchy().create_tile(1, 0, 0).unwrap();

        assert!(!content.enqueue_fetch(&tile).run().is_success());
        assert!(content.force_synchronous_load(&tile).is_err());
        assert!(!content.is_resident(&tile));
    }

    #[test]
    fn test_draw_own_content_uses_identity() {
        let mut content = content();
        let tile = hierarchy().create_tile(0, 1, 1).unwrap();
        content.force_synchronous_load(&tile).unwrap();

        content.draw(&tile, None);

        let (key, data, transform) = &content.drawer().drawn[0];
        assert_eq!(key, &tile.key().to_string());
        assert_eq!(data.as_ref(), tile.key().to_string().as_bytes());
        assert_eq!(*transform, TextureTransform::IDENTITY);
    }

    #[test]
    fn test_draw_with_fallback_uses_ancestor_content() {
        let levels = hierarchy();
        let mut content = content();
        let parent = levels.create_tile(0, 2, 5).unwrap();
        let child = levels.subdivide(&parent).unwrap()[0].clone();
        content.force_synchronous_load(&parent).unwrap();

        content.draw(&child, Some(&parent));

        let (key, data, transform) = &content.drawer().drawn[0];
        assert_eq!(key, &child.key().to_string());
        assert_eq!(data.as_ref(), parent.key().to_string().as_bytes());
        assert!((transform.scale_s - 0.5).abs() < 1e-12);
        assert!(transform.offset_s.abs() < 1e-12);
    }

    #[test]
    fn test_draw_skips_missing_content() {
        let mut content = content();
        let tile = hierarchy().create_tile(0, 0, 0).unwrap();
        content.draw(&tile, None);
        assert!(content.drawer().drawn.is_empty());
    }

    #[test]
    fn test_diagnostics_forwarded_to_drawer() {
        let mut content = content();
        let tile = hierarchy().create_tile(0, 0, 0).unwrap();
        let diagnostics = Diagnostics {
            tile_outlines: true,
            ..Diagnostics::default()
        };
        content.draw_diagnostics(&tile, &diagnostics);
        assert_eq!(content.drawer_mut().outlines, 1);
    }
}
