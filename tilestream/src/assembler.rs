//! Per-frame visibility and level-of-detail traversal.
//!
//! The [`TileAssembler`] walks the quadtree depth-first from the top-level
//! tiles and decides, for each visible region, which tile to draw:
//!
//! ```text
//! visit(tile, resource)
//!   ├─ not visible ──────────────► prune subtree
//!   ├─ meets render criteria ────► add_tile(tile, resource)
//!   └─ otherwise
//!        resource' = tile if resident or level 0, else resource
//!        visit(child, resource') for each of the four children
//! ```
//!
//! `resource` is the nearest ancestor whose content can stand in for a
//! descendant that is not yet loaded. It is passed down the recursion, so
//! each subtree sees exactly the resource tile of its own ancestor chain.
//!
//! `add_tile` draws a tile with its own content when resident, otherwise
//! requests it and draws it with the resource tile's content, or omits it
//! for this frame when no resident ancestor exists.
//!
//! # Level-of-detail metric
//!
//! A tile needs splitting unless
//!
//! ```text
//! log10(cell_size) <= log10(d) - split_scale
//! cell_size = π · Δlat(rad) · radius / 20
//! ```
//!
//! where `d` is the smallest distance from the eye to the tile's four
//! corners and centre. Larger `split_scale` values favour finer levels.
//!
//! Traversal never blocks on I/O except for the optional synchronous
//! level-0 load.

use std::f64::consts::PI;

use crate::absent::AbsentResourceList;
use crate::content::TileContent;
use crate::geo::{Globe, Sector};
use crate::level::LevelHierarchy;
use crate::request::{EnqueueStatus, RequestQueue};
use crate::tile::Tile;
use crate::view::View;

/// Default split scale for the LOD metric.
pub const DEFAULT_SPLIT_SCALE: f64 = 0.9;

// =============================================================================
// Frame Context
// =============================================================================

/// Everything one traversal reads from or writes to.
pub struct AssemblyContext<'a, C: ?Sized> {
    pub hierarchy: &'a LevelHierarchy,
    pub content: &'a C,
    pub view: &'a View,
    pub globe: &'a dyn Globe,
    /// Restricts drawing to tiles intersecting this sector.
    pub visible_region: Option<Sector>,
    pub absent: &'a mut AbsentResourceList,
    pub queue: &'a mut RequestQueue,
}

/// Counters from one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Tiles examined, including culled ones.
    pub visited: usize,
    /// Tiles pruned by the visibility test.
    pub culled: usize,
    /// Tiles selected for drawing but left out for lack of content.
    pub omitted: usize,
    /// Synchronous level-0 loads attempted.
    pub forced_loads: usize,
    /// Synchronous level-0 loads that failed.
    pub forced_load_failures: usize,
    /// Requests accepted by the queue.
    pub requested: usize,
    /// Requests the queue already held.
    pub duplicates: usize,
    /// Requests dropped because the queue was full.
    pub dropped: usize,
}

/// Result of one traversal.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Tiles to draw, in traversal order.
    pub draw_list: Vec<Tile>,
    pub stats: AssemblyStats,
}

// =============================================================================
// Assembler
// =============================================================================

/// Selects tiles to draw and the fetches to request for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileAssembler {
    split_scale: f64,
    force_level_zero_loads: bool,
}

impl Default for TileAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_SPLIT_SCALE)
    }
}

impl TileAssembler {
    pub fn new(split_scale: f64) -> Self {
        Self {
            split_scale,
            force_level_zero_loads: false,
        }
    }

    /// Loads level-0 tiles synchronously instead of drawing nothing.
    pub fn with_force_level_zero_loads(mut self, force: bool) -> Self {
        self.force_level_zero_loads = force;
        self
    }

    pub fn split_scale(&self) -> f64 {
        self.split_scale
    }

    pub fn set_split_scale(&mut self, split_scale: f64) {
        self.split_scale = split_scale;
    }

    pub fn force_level_zero_loads(&self) -> bool {
        self.force_level_zero_loads
    }

    /// Returns true if `tile` is too coarse for the current view.
    pub fn needs_split(&self, tile: &Tile, view: &View, globe: &dyn Globe) -> bool {
        let exaggeration = view.vertical_exaggeration();
        let sector = tile.sector();
        let eye = view.eye_point();

        let corners = sector.corner_points(globe, exaggeration);
        let center = sector.center_point(globe, exaggeration);
        let nearest = corners
            .iter()
            .chain(std::iter::once(&center))
            .map(|point| eye.distance(*point))
            .fold(f64::INFINITY, f64::min);

        let cell_size = PI * sector.delta_lat_radians() * globe.radius() / 20.0;

        !(cell_size.log10() <= nearest.log10() - self.split_scale)
    }

    /// Returns true if `tile` should be drawn rather than subdivided.
    pub fn meets_render_criteria(
        &self,
        hierarchy: &LevelHierarchy,
        tile: &Tile,
        view: &View,
        globe: &dyn Globe,
    ) -> bool {
        hierarchy.is_finest_level(tile.level_number()) || !self.needs_split(tile, view, globe)
    }

    /// Returns true if `tile` intersects the frustum and the visible region.
    pub fn is_tile_visible(
        tile: &Tile,
        view: &View,
        globe: &dyn Globe,
        visible_region: Option<&Sector>,
    ) -> bool {
        let extent = tile
            .sector()
            .compute_extent(globe, view.vertical_exaggeration());
        if !view.frustum().intersects(&extent) {
            return false;
        }
        visible_region.map_or(true, |region| tile.sector().intersects(region))
    }

    /// Traverses the quadtree from `top_level` and builds the draw list.
    pub fn assemble<C>(&self, ctx: &mut AssemblyContext<'_, C>, top_level: &[Tile]) -> Assembly
    where
        C: TileContent + ?Sized,
    {
        let mut assembly = Assembly::default();
        for tile in top_level {
            self.visit(ctx, tile, None, &mut assembly);
        }

        tracing::trace!(
            visited = assembly.stats.visited,
            culled = assembly.stats.culled,
            selected = assembly.draw_list.len(),
            "Assembled tiles"
        );
        assembly
    }

    fn visit<C>(
        &self,
        ctx: &mut AssemblyContext<'_, C>,
        tile: &Tile,
        resource: Option<&Tile>,
        out: &mut Assembly,
    ) where
        C: TileContent + ?Sized,
    {
        out.stats.visited += 1;

        if !Self::is_tile_visible(tile, ctx.view, ctx.globe, ctx.visible_region.as_ref()) {
            out.stats.culled += 1;
            return;
        }

        if self.meets_render_criteria(ctx.hierarchy, tile, ctx.view, ctx.globe) {
            self.add_tile(ctx, tile, resource, out);
            return;
        }

        let children = match ctx.hierarchy.subdivide(tile) {
            Ok(children) => children,
            Err(e) => {
                // Unreachable while render criteria stop at the finest level.
                tracing::warn!(key = %tile.key(), error = %e, "Cannot subdivide tile");
                self.add_tile(ctx, tile, resource, out);
                return;
            }
        };

        let child_resource = if tile.level_number() == 0 || ctx.content.is_resident(tile) {
            Some(tile)
        } else {
            resource
        };

        for child in &children {
            self.visit(ctx, child, child_resource, out);
        }
    }

    /// Decides what content `tile` draws with and requests it if needed.
    fn add_tile<C>(
        &self,
        ctx: &mut AssemblyContext<'_, C>,
        tile: &Tile,
        resource: Option<&Tile>,
        out: &mut Assembly,
    ) where
        C: TileContent + ?Sized,
    {
        let mut tile = tile.clone();
        tile.set_fallback(None);

        if ctx.content.is_resident(&tile) {
            out.draw_list.push(tile);
            return;
        }

        if tile.level_number() == 0
            && self.force_level_zero_loads
            && !is_resource_absent(ctx, &tile)
        {
            self.force_load(ctx, &tile, out);
            if ctx.content.is_resident(&tile) {
                out.draw_list.push(tile);
                return;
            }
        }

        if !is_resource_absent(ctx, &tile) {
            let task = ctx.content.enqueue_fetch(&tile);
            match ctx.queue.offer(task) {
                EnqueueStatus::Queued => out.stats.requested += 1,
                EnqueueStatus::Duplicate => out.stats.duplicates += 1,
                EnqueueStatus::Dropped => out.stats.dropped += 1,
            }
        }

        let Some(resource) = resource else {
            out.stats.omitted += 1;
            return;
        };

        if resource.level_number() == 0
            && self.force_level_zero_loads
            && !ctx.content.is_resident(resource)
            && !is_resource_absent(ctx, resource)
        {
            self.force_load(ctx, resource, out);
        }

        if ctx.content.is_resident(resource) {
            tracing::trace!(key = %tile.key(), fallback = %resource.key(), "Drawing with ancestor content");
            tile.set_fallback(Some(resource.key().clone()));
            out.draw_list.push(tile);
        } else {
            out.stats.omitted += 1;
        }
    }

    fn force_load<C>(&self, ctx: &mut AssemblyContext<'_, C>, tile: &Tile, out: &mut Assembly)
    where
        C: TileContent + ?Sized,
    {
        out.stats.forced_loads += 1;
        match ctx.content.force_synchronous_load(tile) {
            Ok(()) => {
                ctx.absent.unmark(tile.key());
            }
            Err(e) => {
                out.stats.forced_load_failures += 1;
                ctx.absent.mark_absent(tile.key());
                tracing::warn!(key = %tile.key(), error = %e, "Forced level-0 load failed");
            }
        }
    }
}

/// True if requests for `tile` are currently suppressed.
fn is_resource_absent<C: ?Sized>(ctx: &mut AssemblyContext<'_, C>, tile: &Tile) -> bool {
    ctx.hierarchy.is_level_empty(tile.level_number()) || ctx.absent.is_absent(tile.key())
}

/// Sorts a draw list so coarser content draws first.
///
/// The sort is stable: tiles of equal effective level keep traversal order.
pub fn sort_draw_list(tiles: &mut [Tile]) {
    tiles.sort_by_key(Tile::effective_level_number);
}
