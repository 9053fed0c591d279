//! Tile identity and fallback relations.
//!
//! A [`Tile`] is one quadtree node: a sector at one resolution level. Tiles
//! are cheap to create and carry no content; residency is always asked of
//! the content collaborator. The fallback relation is a [`TileKey`] rather
//! than a reference, so resolving a fallback is a lookup, not a pointer
//! chase, and no tile ever borrows another.

use std::fmt;
use std::sync::Arc;

use crate::geo::Sector;
use crate::level::LevelDescriptor;

/// Identity of a tile: level, row, column and cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    level: usize,
    row: i32,
    col: i32,
    cache_name: Arc<str>,
}

impl TileKey {
    /// Creates a key for the tile at (`level`, `row`, `col`) in `cache_name`.
    pub fn new(level: usize, row: i32, col: i32, cache_name: impl Into<Arc<str>>) -> Self {
        Self {
            level,
            row,
            col,
            cache_name: cache_name.into(),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn row(&self) -> i32 {
        self.row
    }

    pub fn col(&self) -> i32 {
        self.col
    }

    /// Cache namespace of the tile's level.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.cache_name, self.row, self.col)
    }
}

/// Scale and offset mapping a tile's sector into an ancestor's texture space.
///
/// Texture coordinates run west-to-east (`s`) and south-to-north (`t`) over
/// the ancestor's sector. A descendant drawing with ancestor content uses
/// `s' = s * scale_s + offset_s` (likewise for `t`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureTransform {
    pub scale_s: f64,
    pub scale_t: f64,
    pub offset_s: f64,
    pub offset_t: f64,
}

impl TextureTransform {
    /// The identity transform (a tile drawing its own content).
    pub const IDENTITY: TextureTransform = TextureTransform {
        scale_s: 1.0,
        scale_t: 1.0,
        offset_s: 0.0,
        offset_t: 0.0,
    };
}

/// One quadtree node.
#[derive(Debug, Clone)]
pub struct Tile {
    key: TileKey,
    sector: Sector,
    level: Arc<LevelDescriptor>,
    fallback: Option<TileKey>,
}

impl Tile {
    pub(crate) fn new(level: Arc<LevelDescriptor>, row: i32, col: i32, sector: Sector) -> Self {
        let key = TileKey::new(level.number(), row, col, level.cache_name_arc());
        Self {
            key,
            sector,
            level,
            fallback: None,
        }
    }

    pub fn key(&self) -> &TileKey {
        &self.key
    }

    pub fn sector(&self) -> &Sector {
        &self.sector
    }

    /// Descriptor of the level this tile belongs to.
    pub fn level(&self) -> &LevelDescriptor {
        &self.level
    }

    pub fn level_number(&self) -> usize {
        self.key.level
    }

    pub fn row(&self) -> i32 {
        self.key.row
    }

    pub fn col(&self) -> i32 {
        self.key.col
    }

    /// Key of the tile whose content is drawn in place of this one.
    pub fn fallback(&self) -> Option<&TileKey> {
        self.fallback.as_ref()
    }

    pub fn set_fallback(&mut self, fallback: Option<TileKey>) {
        self.fallback = fallback;
    }

    /// Level of the content actually drawn: the fallback's level if any.
    pub fn effective_level_number(&self) -> usize {
        self.fallback
            .as_ref()
            .map_or(self.key.level, TileKey::level)
    }

    /// Computes the transform that crops `ancestor`'s content to this tile.
    pub fn texture_transform(&self, ancestor: &Tile) -> TextureTransform {
        let outer = ancestor.sector();
        let inner = &self.sector;
        if outer.delta_lon() <= 0.0 || outer.delta_lat() <= 0.0 {
            return TextureTransform::IDENTITY;
        }
        TextureTransform {
            scale_s: inner.delta_lon() / outer.delta_lon(),
            scale_t: inner.delta_lat() / outer.delta_lat(),
            offset_s: (inner.west() - outer.west()) / outer.delta_lon(),
            offset_t: (inner.south() - outer.south()) / outer.delta_lat(),
        }
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.fallback == other.fallback
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{HierarchyConfig, LevelHierarchy};

    fn hierarchy() -> LevelHierarchy {
        LevelHierarchy::new(&HierarchyConfig::default().with_num_levels(3)).unwrap()
    }

    #[test]
    fn test_key_accessors_and_display() {
        let key = TileKey::new(2, 7, 11, "imagery/2");
        assert_eq!(key.level(), 2);
        assert_eq!(key.row(), 7);
        assert_eq!(key.col(), 11);
        assert_eq!(key.cache_name(), "imagery/2");
        assert_eq!(key.to_string(), "imagery/2/7_11");
    }

    #[test]
    fn test_key_hash_identity() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TileKey::new(1, 2, 3, "a/1"));
        set.insert(TileKey::new(1, 2, 3, "a/1"));
        set.insert(TileKey::new(1, 2, 3, "b/1"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_effective_level_uses_fallback() {
        let levels = hierarchy();
        let mut tile = levels.create_tile(2, 10, 20).unwrap();
        assert_eq!(tile.effective_level_number(), 2);

        let ancestor = levels.create_tile(0, 2, 5).unwrap();
        tile.set_fallback(Some(ancestor.key().clone()));
        assert_eq!(tile.effective_level_number(), 0);

        tile.set_fallback(None);
        assert_eq!(tile.effective_level_number(), 2);
    }

    #[test]
    fn test_texture_transform_for_quadrant() {
        let levels = hierarchy();
        let parent = levels.create_tile(0, 2, 5).unwrap();
        let children = levels.subdivide(&parent).unwrap();

        // Northeast child covers the upper-right quarter of the parent.
        let transform = children[3].texture_transform(&parent);
        assert!((transform.scale_s - 0.5).abs() < 1e-12);
        assert!((transform.scale_t - 0.5).abs() < 1e-12);
        assert!((transform.offset_s - 0.5).abs() < 1e-12);
        assert!((transform.offset_t - 0.5).abs() < 1e-12);

        assert_eq!(parent.texture_transform(&parent), TextureTransform::IDENTITY);
    }

    #[test]
    fn test_tile_equality_includes_fallback() {
        let levels = hierarchy();
        let a = levels.create_tile(1, 3, 4).unwrap();
        let mut b = a.clone();
        assert_eq!(a, b);
        b.set_fallback(Some(TileKey::new(0, 1, 2, "x")));
        assert_ne!(a, b);
    }
}
