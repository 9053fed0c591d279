//! Resolution levels and tile addressing.
//!
//! A [`LevelHierarchy`] is an immutable, ordered list of
//! [`LevelDescriptor`]s plus a tiling origin and covered sector. It maps
//! between (level, row, column) keys and geographic sectors in both
//! directions:
//!
//! ```text
//! row = floor((lat - origin_lat) / delta_lat)
//! col = floor((lon - origin_lon) / delta_lon)
//!
//! sector(level, row, col) = [origin_lat + row·Δlat, origin_lat + (row+1)·Δlat]
//!                         × [origin_lon + col·Δlon, origin_lon + (col+1)·Δlon]
//! ```
//!
//! Each level halves the angular delta of the one above it, so every tile
//! has exactly four children at the next level.
//!
//! # Example
//!
//! ```
//! use tilestream::level::{HierarchyConfig, LevelHierarchy};
//!
//! let config = HierarchyConfig::default().with_num_levels(3);
//! let levels = LevelHierarchy::new(&config).unwrap();
//!
//! // 36° tiles over the whole globe: 5 rows by 10 columns.
//! assert_eq!(levels.top_level_tiles().len(), 50);
//! assert!(levels.is_finest_level(2));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::HierarchyError;
use crate::geo::Sector;
use crate::tile::{Tile, TileKey};

// =============================================================================
// Defaults
// =============================================================================

/// Default angular size of a level-zero tile in degrees.
pub const DEFAULT_LEVEL_ZERO_DELTA: f64 = 36.0;

/// Default number of levels.
pub const DEFAULT_NUM_LEVELS: usize = 12;

/// Default tile width and height in content units (pixels).
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default cache namespace.
pub const DEFAULT_CACHE_NAME: &str = "tiles";

/// Default file suffix for persisted content.
pub const DEFAULT_FORMAT_SUFFIX: &str = ".dds";

/// Upper bound on the number of level-zero tiles a hierarchy may have.
pub const MAX_TOP_LEVEL_TILES: u64 = 1 << 20;

// =============================================================================
// Level Descriptor
// =============================================================================

/// One resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDescriptor {
    number: usize,
    tile_width: u32,
    tile_height: u32,
    delta_lat: f64,
    delta_lon: f64,
    cache_name: Arc<str>,
    format_suffix: String,
    expiry: Option<DateTime<Utc>>,
    empty: bool,
}

impl LevelDescriptor {
    /// Level index; 0 is the coarsest.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    /// Angular tile height in degrees.
    pub fn delta_lat(&self) -> f64 {
        self.delta_lat
    }

    /// Angular tile width in degrees.
    pub fn delta_lon(&self) -> f64 {
        self.delta_lon
    }

    /// Cache namespace for this level, e.g. `"imagery/3"`.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub(crate) fn cache_name_arc(&self) -> Arc<str> {
        Arc::clone(&self.cache_name)
    }

    pub fn format_suffix(&self) -> &str {
        &self.format_suffix
    }

    /// Time before which cached content of this level is stale.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// True when the level has no backing data.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Row containing `lat` at this level.
    pub fn row_for_latitude(&self, lat: f64, origin_lat: f64) -> i32 {
        ((lat - origin_lat) / self.delta_lat).floor() as i32
    }

    /// Column containing `lon` at this level.
    pub fn column_for_longitude(&self, lon: f64, origin_lon: f64) -> i32 {
        ((lon - origin_lon) / self.delta_lon).floor() as i32
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Caller-supplied description of a level hierarchy.
///
/// The hierarchy copies what it needs at construction, so later changes to
/// a config value never affect a hierarchy already in use.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyConfig {
    /// Region covered by the dataset.
    pub sector: Sector,
    /// Latitude of the tiling grid origin.
    pub origin_lat: f64,
    /// Longitude of the tiling grid origin.
    pub origin_lon: f64,
    /// Level-zero tile height in degrees.
    pub level_zero_delta_lat: f64,
    /// Level-zero tile width in degrees.
    pub level_zero_delta_lon: f64,
    /// Total number of levels.
    pub num_levels: usize,
    /// Number of leading levels without data.
    pub num_empty_levels: usize,
    /// Further levels without data.
    pub inactive_levels: BTreeSet<usize>,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Base cache namespace; each level appends `/<level>`.
    pub cache_name: String,
    pub format_suffix: String,
    /// Expiry applied to every level unless overridden below.
    pub expiry: Option<DateTime<Utc>>,
    /// Per-level expiry overrides.
    pub level_expiry: BTreeMap<usize, DateTime<Utc>>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            sector: Sector::FULL_SPHERE,
            origin_lat: -90.0,
            origin_lon: -180.0,
            level_zero_delta_lat: DEFAULT_LEVEL_ZERO_DELTA,
            level_zero_delta_lon: DEFAULT_LEVEL_ZERO_DELTA,
            num_levels: DEFAULT_NUM_LEVELS,
            num_empty_levels: 0,
            inactive_levels: BTreeSet::new(),
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            format_suffix: DEFAULT_FORMAT_SUFFIX.to_string(),
            expiry: None,
            level_expiry: BTreeMap::new(),
        }
    }
}

impl HierarchyConfig {
    /// Set the covered sector.
    pub fn with_sector(mut self, sector: Sector) -> Self {
        self.sector = sector;
        self
    }

    /// Set the tiling origin.
    pub fn with_origin(mut self, lat: f64, lon: f64) -> Self {
        self.origin_lat = lat;
        self.origin_lon = lon;
        self
    }

    /// Set the level-zero tile size in degrees.
    pub fn with_level_zero_delta(mut self, lat: f64, lon: f64) -> Self {
        self.level_zero_delta_lat = lat;
        self.level_zero_delta_lon = lon;
        self
    }

    /// Set the number of levels.
    pub fn with_num_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    /// Set the number of leading empty levels.
    pub fn with_num_empty_levels(mut self, count: usize) -> Self {
        self.num_empty_levels = count;
        self
    }

    /// Mark a level as having no data.
    pub fn with_inactive_level(mut self, level: usize) -> Self {
        self.inactive_levels.insert(level);
        self
    }

    /// Set the tile size in content units.
    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Set the base cache namespace.
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Set the expiry applied to all levels.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Set the expiry of a single level.
    pub fn with_level_expiry(mut self, level: usize, expiry: DateTime<Utc>) -> Self {
        self.level_expiry.insert(level, expiry);
        self
    }
}

// =============================================================================
// Level Hierarchy
// =============================================================================

/// Immutable, ordered set of resolution levels.
#[derive(Debug, Clone)]
pub struct LevelHierarchy {
    levels: Vec<Arc<LevelDescriptor>>,
    sector: Sector,
    origin_lat: f64,
    origin_lon: f64,
}

impl LevelHierarchy {
    /// Builds the hierarchy from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyError` if there are no levels, the level-zero
    /// delta or tile size is invalid, or the delta is so small that the
    /// sector would need more than [`MAX_TOP_LEVEL_TILES`] top-level tiles.
    pub fn new(config: &HierarchyConfig) -> Result<Self, HierarchyError> {
        if config.num_levels == 0 {
            return Err(HierarchyError::NoLevels);
        }

        let (dlat, dlon) = (config.level_zero_delta_lat, config.level_zero_delta_lon);
        if !(dlat.is_finite() && dlon.is_finite() && dlat > 0.0 && dlon > 0.0) {
            return Err(HierarchyError::InvalidDelta {
                lat: dlat,
                lon: dlon,
            });
        }

        if config.tile_width == 0 || config.tile_height == 0 {
            return Err(HierarchyError::InvalidTileSize {
                width: config.tile_width,
                height: config.tile_height,
            });
        }

        let mut levels = Vec::with_capacity(config.num_levels);
        let mut scale = 1.0_f64;
        for number in 0..config.num_levels {
            let empty =
                number < config.num_empty_levels || config.inactive_levels.contains(&number);
            let expiry = config
                .level_expiry
                .get(&number)
                .copied()
                .or(config.expiry);

            levels.push(Arc::new(LevelDescriptor {
                number,
                tile_width: config.tile_width,
                tile_height: config.tile_height,
                delta_lat: dlat * scale,
                delta_lon: dlon * scale,
                cache_name: Arc::from(format!("{}/{}", config.cache_name, number)),
                format_suffix: config.format_suffix.clone(),
                expiry,
                empty,
            }));
            scale *= 0.5;
        }

        let (rows, cols) = top_level_span(
            &levels[0],
            &config.sector,
            config.origin_lat,
            config.origin_lon,
        );
        let count = span_len(&rows)
            .checked_mul(span_len(&cols))
            .unwrap_or(u64::MAX);
        if count > MAX_TOP_LEVEL_TILES {
            return Err(HierarchyError::TooManyTopLevelTiles {
                count,
                max: MAX_TOP_LEVEL_TILES,
            });
        }

        tracing::info!(
            levels = levels.len(),
            empty = levels.iter().filter(|l| l.is_empty()).count(),
            sector = %config.sector,
            cache = %config.cache_name,
            "Created level hierarchy"
        );

        Ok(Self {
            levels,
            sector: config.sector,
            origin_lat: config.origin_lat,
            origin_lon: config.origin_lon,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Returns the descriptor of `level`, if it exists.
    pub fn level(&self, level: usize) -> Option<&LevelDescriptor> {
        self.levels.get(level).map(|l| l.as_ref())
    }

    pub fn levels(&self) -> impl Iterator<Item = &LevelDescriptor> {
        self.levels.iter().map(|l| l.as_ref())
    }

    /// The finest level.
    pub fn last_level(&self) -> &LevelDescriptor {
        // Construction guarantees at least one level.
        &self.levels[self.levels.len() - 1]
    }

    /// Region covered by the dataset.
    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    /// Tiling origin as (latitude, longitude).
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lat, self.origin_lon)
    }

    /// True if `level` is the finest available level.
    pub fn is_finest_level(&self, level: usize) -> bool {
        level + 1 == self.levels.len()
    }

    /// True if `level` has no backing data (or does not exist).
    pub fn is_level_empty(&self, level: usize) -> bool {
        self.levels.get(level).map_or(true, |l| l.is_empty())
    }

    fn descriptor(&self, level: usize) -> Result<&Arc<LevelDescriptor>, HierarchyError> {
        self.levels
            .get(level)
            .ok_or(HierarchyError::LevelOutOfRange {
                level,
                count: self.levels.len(),
            })
    }

    /// Row containing `lat` at `level`.
    pub fn row_for_latitude(&self, level: usize, lat: f64) -> Result<i32, HierarchyError> {
        Ok(self.descriptor(level)?.row_for_latitude(lat, self.origin_lat))
    }

    /// Column containing `lon` at `level`.
    pub fn column_for_longitude(&self, level: usize, lon: f64) -> Result<i32, HierarchyError> {
        Ok(self
            .descriptor(level)?
            .column_for_longitude(lon, self.origin_lon))
    }

    /// Sector covered by the tile at (`level`, `row`, `col`).
    pub fn sector_for_key(&self, level: usize, row: i32, col: i32) -> Result<Sector, HierarchyError> {
        let descriptor = self.descriptor(level)?;
        Ok(self.key_sector(descriptor, row, col))
    }

    fn key_sector(&self, descriptor: &LevelDescriptor, row: i32, col: i32) -> Sector {
        let (dlat, dlon) = (descriptor.delta_lat, descriptor.delta_lon);
        let south = self.origin_lat + f64::from(row) * dlat;
        let west = self.origin_lon + f64::from(col) * dlon;
        Sector::from_bounds(south, south + dlat, west, west + dlon)
    }

    /// Creates the tile at (`level`, `row`, `col`).
    pub fn create_tile(&self, level: usize, row: i32, col: i32) -> Result<Tile, HierarchyError> {
        let descriptor = self.descriptor(level)?;
        let sector = self.key_sector(descriptor, row, col);
        Ok(Tile::new(Arc::clone(descriptor), row, col, sector))
    }

    /// Materialises the tile identified by `key`.
    ///
    /// This is how fallback keys are resolved back into drawable tiles.
    pub fn tile_for_key(&self, key: &TileKey) -> Result<Tile, HierarchyError> {
        let descriptor = self.descriptor(key.level())?;
        if descriptor.cache_name() != key.cache_name() {
            return Err(HierarchyError::NamespaceMismatch {
                expected: descriptor.cache_name().to_string(),
                found: key.cache_name().to_string(),
            });
        }
        self.create_tile(key.level(), key.row(), key.col())
    }

    /// Creates the level-zero tiles covering the hierarchy's sector.
    ///
    /// Tiles are returned row-major, south to north, west to east. Callers
    /// compute this once and reuse it every frame.
    pub fn top_level_tiles(&self) -> Vec<Tile> {
        let level = &self.levels[0];
        let (rows, cols) = top_level_span(level, &self.sector, self.origin_lat, self.origin_lon);

        // Bounded by MAX_TOP_LEVEL_TILES at construction.
        let mut tiles = Vec::with_capacity((span_len(&rows) * span_len(&cols)) as usize);
        for row in rows {
            for col in cols.clone() {
                let tile_sector = self.key_sector(level, row, col);
                tiles.push(Tile::new(Arc::clone(level), row, col, tile_sector));
            }
        }
        tiles
    }

    /// Creates the four children of `tile` at the next level.
    ///
    /// Children are ordered southwest, southeast, northwest, northeast.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyError::FinestLevel` if `tile` is already at the
    /// finest level; callers check [`Self::is_finest_level`] first.
    pub fn subdivide(&self, tile: &Tile) -> Result<[Tile; 4], HierarchyError> {
        let level = tile.level_number();
        if self.is_finest_level(level) {
            return Err(HierarchyError::FinestLevel { level });
        }
        let next = self.descriptor(level + 1)?;

        Ok(tile.sector().subdivide().map(|quadrant| {
            let (lat, lon) = quadrant.centroid();
            let row = next.row_for_latitude(lat, self.origin_lat);
            let col = next.column_for_longitude(lon, self.origin_lon);
            Tile::new(Arc::clone(next), row, col, quadrant)
        }))
    }
}

/// Row and column ranges of the level-zero tiles covering `sector`.
fn top_level_span(
    level: &LevelDescriptor,
    sector: &Sector,
    origin_lat: f64,
    origin_lon: f64,
) -> (RangeInclusive<i32>, RangeInclusive<i32>) {
    let first_row = level.row_for_latitude(sector.south(), origin_lat);
    let last_row = last_index(sector.north(), origin_lat, level.delta_lat, first_row);
    let first_col = level.column_for_longitude(sector.west(), origin_lon);
    let last_col = last_index(sector.east(), origin_lon, level.delta_lon, first_col);
    (first_row..=last_row, first_col..=last_col)
}

fn span_len(range: &RangeInclusive<i32>) -> u64 {
    (i64::from(*range.end()) - i64::from(*range.start()) + 1).max(0) as u64
}

/// Index of the last cell touched by a bound, not counting a bound that
/// falls exactly on a cell edge.
fn last_index(bound: f64, origin: f64, delta: f64, first: i32) -> i32 {
    let cells = (bound - origin) / delta;
    let index = cells.floor() as i32;
    if cells == cells.floor() && index > first {
        index - 1
    } else {
        index
    }
}
