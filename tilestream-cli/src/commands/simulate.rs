//! `tilestream simulate`: run frames against a synthetic or on-disk tile
//! source and report what the engine does each frame.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Args;
use glam::DVec3;

use tilestream::config::ConfigFile;
use tilestream::content::{
    CachedTile, CachedTileContent, DirectoryFetcher, TileDrawer, TileFetcher, TileMemoryCache,
};
use tilestream::error::FetchError;
use tilestream::geo::{Globe, SphereGlobe};
use tilestream::layer::{FrameStats, LayerDriver};
use tilestream::level::LevelHierarchy;
use tilestream::pool::TokioFetchPool;
use tilestream::tile::{TextureTransform, Tile};
use tilestream::view::{Frustum, View};

use crate::error::CliError;

/// Arguments for `simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Eye latitude in decimal degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub lat: f64,

    /// Eye longitude in decimal degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub lon: f64,

    /// Eye altitude above the surface in meters
    #[arg(long, default_value_t = 100_000.0)]
    pub altitude: f64,

    /// Multiply the altitude by this factor after every frame
    #[arg(long, default_value_t = 1.0)]
    pub descent: f64,

    /// Number of frames to render
    #[arg(long, default_value_t = 20)]
    pub frames: u64,

    /// Pause between frames in milliseconds
    #[arg(long, default_value_t = 50)]
    pub frame_interval: u64,

    /// Simulated fetch latency in milliseconds
    #[arg(long, default_value_t = 20)]
    pub latency: u64,

    /// Fail every Nth synthetic fetch (0 never fails)
    #[arg(long, default_value_t = 0)]
    pub fail_every: u64,

    /// Override the split scale from the config file
    #[arg(long, allow_hyphen_values = true)]
    pub split_scale: Option<f64>,

    /// Override the number of levels from the config file
    #[arg(long)]
    pub levels: Option<usize>,

    /// Load level-0 tiles synchronously
    #[arg(long)]
    pub force_level_zero: bool,

    /// Look straight down with a perspective frustum instead of seeing everything
    #[arg(long)]
    pub perspective: bool,

    /// Read tiles from this directory instead of generating them
    #[arg(long)]
    pub tile_directory: Option<PathBuf>,
}

// =============================================================================
// Synthetic Source
// =============================================================================

/// Fetcher that fabricates content after a fixed delay.
#[derive(Debug)]
pub struct SyntheticFetcher {
    latency: Duration,
    fail_every: u64,
    fetches: AtomicU64,
}

impl SyntheticFetcher {
    pub fn new(latency: Duration, fail_every: u64) -> Self {
        Self {
            latency,
            fail_every,
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of fetches attempted so far.
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

impl TileFetcher for SyntheticFetcher {
    fn fetch(&self, tile: &Tile) -> Result<Bytes, FetchError> {
        let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(FetchError::NotFound(format!("synthetic miss for {}", tile.key())));
        }
        Ok(Bytes::from(tile.key().to_string()))
    }
}

/// Drawer that tallies draws instead of rendering.
#[derive(Debug, Default)]
pub struct TallyDrawer {
    pub draws: u64,
    pub fallback_draws: u64,
    pub bytes: u64,
}

impl TileDrawer for TallyDrawer {
    fn draw(&mut self, _tile: &Tile, content: &CachedTile, transform: TextureTransform) {
        self.draws += 1;
        self.bytes += content.len() as u64;
        if transform != TextureTransform::IDENTITY {
            self.fallback_draws += 1;
        }
    }
}

// =============================================================================
// Command
// =============================================================================

/// Run the simulate command.
pub fn run(args: SimulateArgs, mut config: ConfigFile) -> Result<(), CliError> {
    if args.frames == 0 {
        return Err(CliError::InvalidArgument("--frames must be at least 1".into()));
    }
    if !args.descent.is_finite() || args.descent <= 0.0 {
        return Err(CliError::InvalidArgument("--descent must be positive".into()));
    }
    if let Some(split_scale) = args.split_scale {
        config.layer.split_scale = split_scale;
    }
    if let Some(levels) = args.levels {
        config.hierarchy.num_levels = levels;
    }
    if args.force_level_zero {
        config.layer.force_level_zero_loads = true;
    }
    if let Some(dir) = &args.tile_directory {
        config.tile_directory = Some(dir.clone());
    }

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let pool = TokioFetchPool::new(runtime.handle().clone(), config.pool_capacity);
    let hierarchy = LevelHierarchy::new(&config.hierarchy)?;
    let cache = Arc::new(config.layer.memory_cache(config.memory_cache_size));

    match config.tile_directory.clone() {
        Some(root) => {
            println!("Reading tiles from {}", root.display());
            let fetcher = DirectoryFetcher::new(root);
            run_frames(&args, &config, hierarchy, cache, fetcher, pool)
        }
        None => {
            let fetcher = SyntheticFetcher::new(
                Duration::from_millis(args.latency),
                args.fail_every,
            );
            run_frames(&args, &config, hierarchy, cache, fetcher, pool)
        }
    }
}

fn run_frames<F: TileFetcher>(
    args: &SimulateArgs,
    config: &ConfigFile,
    hierarchy: LevelHierarchy,
    cache: Arc<TileMemoryCache>,
    fetcher: F,
    pool: TokioFetchPool,
) -> Result<(), CliError> {
    let globe = SphereGlobe::earth();
    let content = CachedTileContent::new(Arc::clone(&cache), fetcher, TallyDrawer::default());
    let mut layer = LayerDriver::new(
        config.hierarchy.cache_name.clone(),
        hierarchy,
        content,
        pool,
        config.layer.clone(),
    );

    println!(
        "{:>5} {:>12} {:>6} {:>8} {:>7} {:>6} {:>6} {:>7} {:>6} {:>6}",
        "frame", "altitude", "drawn", "fallback", "omitted", "req", "disp", "discard", "done", "failed"
    );

    let mut altitude = args.altitude;
    let mut totals = FrameStats::default();
    for _ in 0..args.frames {
        let view = build_view(&globe, args.lat, args.lon, altitude, args.perspective);
        let stats = layer.render(&view, &globe, None);
        print_frame(&stats, altitude);
        accumulate(&mut totals, &stats);

        altitude *= args.descent;
        std::thread::sleep(Duration::from_millis(args.frame_interval));
    }

    println!();
    println!("Draw list by level (last frame):");
    for (level, count) in level_histogram(layer.last_draw_list()) {
        println!("  L{:<2} {}", level, count);
    }

    let cache_stats = cache.stats();
    let pool_stats = layer.pool().stats();
    let drawer = layer.content().drawer();
    println!();
    println!("Totals:");
    println!("  Requests:     {}", totals.requested);
    println!("  Dispatched:   {}", totals.dispatched);
    println!("  Discarded:    {}", totals.discarded);
    println!("  Completions:  {}", totals.completions);
    println!("  Failures:     {}", totals.failures);
    println!("  Draw calls:   {} ({} from ancestors)", drawer.draws, drawer.fallback_draws);
    println!("  Absent tiles: {}", layer.absent().len());
    println!(
        "  Cache:        {} entries, {} bytes, {:.1}% hit rate",
        cache_stats.entry_count,
        cache_stats.size_bytes,
        cache_stats.hit_rate() * 100.0
    );
    println!(
        "  Pool:         {} submitted, {} succeeded, {} failed, {} still running",
        pool_stats.submitted, pool_stats.succeeded, pool_stats.failed, pool_stats.in_flight
    );

    Ok(())
}

/// Builds the view for an eye above (`lat`, `lon`).
fn build_view(globe: &SphereGlobe, lat: f64, lon: f64, altitude: f64, perspective: bool) -> View {
    let eye = globe.compute_point(lat, lon, altitude);
    if !perspective {
        return View::new(eye, Frustum::unbounded());
    }

    let target = globe.compute_point(lat, lon, 0.0);
    // Looking straight down, "up" must not be parallel to the view direction.
    let up = if lat.abs() > 80.0 { DVec3::Z } else { DVec3::Y };
    let near = (altitude * 0.01).max(1.0);
    let far = altitude + 2.0 * globe.radius();
    View::look_at(eye, target, up, 60f64.to_radians(), 16.0 / 9.0, near, far)
}

fn print_frame(stats: &FrameStats, altitude: f64) {
    println!(
        "{:>5} {:>12.0} {:>6} {:>8} {:>7} {:>6} {:>6} {:>7} {:>6} {:>6}",
        stats.frame,
        altitude,
        stats.drawn,
        stats.with_fallback,
        stats.omitted,
        stats.requested,
        stats.dispatched,
        stats.discarded,
        stats.completions,
        stats.failures
    );
}

fn accumulate(totals: &mut FrameStats, stats: &FrameStats) {
    totals.requested += stats.requested;
    totals.dispatched += stats.dispatched;
    totals.discarded += stats.discarded;
    totals.completions += stats.completions;
    totals.failures += stats.failures;
}

/// Counts tiles per level.
fn level_histogram(tiles: &[Tile]) -> BTreeMap<usize, usize> {
    let mut histogram = BTreeMap::new();
    for tile in tiles {
        *histogram.entry(tile.level_number()).or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestream::level::HierarchyConfig;

    fn top_tile() -> Tile {
        LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(2))
            .unwrap()
            .create_tile(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_synthetic_fetcher_fails_every_nth() {
        let fetcher = SyntheticFetcher::new(Duration::ZERO, 3);
        let tile = top_tile();

        let results: Vec<bool> = (0..6).map(|_| fetcher.fetch(&tile).is_ok()).collect();

        assert_eq!(results, vec![true, true, false, true, true, false]);
        assert_eq!(fetcher.fetches(), 6);
    }

    #[test]
    fn test_synthetic_fetcher_never_fails_when_disabled() {
        let fetcher = SyntheticFetcher::new(Duration::ZERO, 0);
        let tile = top_tile();

        assert!((0..10).all(|_| fetcher.fetch(&tile).is_ok()));
    }

    #[test]
    fn test_level_histogram() {
        let hierarchy = LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(3)).unwrap();
        let top = hierarchy.top_level_tiles();
        let children = hierarchy.subdivide(&top[0]).unwrap();
        let mut tiles = top[1..].to_vec();
        tiles.extend(children);

        let histogram = level_histogram(&tiles);

        assert_eq!(histogram.get(&0), Some(&49));
        assert_eq!(histogram.get(&1), Some(&4));
    }

    #[test]
    fn test_perspective_view_sees_the_ground_below() {
        let globe = SphereGlobe::earth();
        let view = build_view(&globe, 45.0, 7.0, 10_000.0, true);

        assert!(view
            .frustum()
            .contains_point(globe.compute_point(45.0, 7.0, 0.0)));
        assert!(!view
            .frustum()
            .contains_point(globe.compute_point(45.0, 97.0, 0.0)));
    }

    #[test]
    fn test_rejects_zero_frames() {
        let args = SimulateArgs {
            lat: 0.0,
            lon: 0.0,
            altitude: 1000.0,
            descent: 1.0,
            frames: 0,
            frame_interval: 0,
            latency: 0,
            fail_every: 0,
            split_scale: None,
            levels: None,
            force_level_zero: false,
            perspective: false,
            tile_directory: None,
        };

        assert!(matches!(
            run(args, ConfigFile::default()),
            Err(CliError::InvalidArgument(_))
        ));
    }
}
