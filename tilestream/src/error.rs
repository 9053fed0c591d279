//! Error types for the tile streaming engine.
//!
//! Traversal, sorting and expiry checks are infallible. Errors arise only
//! while building the level hierarchy and at the fetch/dispatch boundary,
//! where every `FetchError` collapses to a single "failed" outcome.

use thiserror::Error;

/// Errors from geographic value construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    /// Latitude bounds are reversed or out of range.
    #[error("Invalid latitude bounds: south {south} / north {north}")]
    InvalidLatitude { south: f64, north: f64 },

    /// Longitude bounds are reversed or out of range.
    #[error("Invalid longitude bounds: west {west} / east {east}")]
    InvalidLongitude { west: f64, east: f64 },
}

/// Errors from building or addressing a level hierarchy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HierarchyError {
    /// The hierarchy must contain at least one level.
    #[error("Level hierarchy requires at least one level")]
    NoLevels,

    /// Angular tile size must be positive and finite.
    #[error("Invalid level-zero delta: {lat}° x {lon}°")]
    InvalidDelta { lat: f64, lon: f64 },

    /// Tile pixel dimensions must be non-zero.
    #[error("Invalid tile size: {width}x{height}")]
    InvalidTileSize { width: u32, height: u32 },

    /// Requested level does not exist.
    #[error("Level {level} out of range (hierarchy has {count} levels)")]
    LevelOutOfRange { level: usize, count: usize },

    /// Attempted to subdivide a tile already at the finest level.
    #[error("Cannot subdivide tile at finest level {level}")]
    FinestLevel { level: usize },

    /// Tile key belongs to a different cache namespace.
    #[error("Tile key namespace '{found}' does not match level namespace '{expected}'")]
    NamespaceMismatch { expected: String, found: String },

    /// Level-zero delta is too small for the sector.
    #[error("Level-zero delta needs {count} top-level tiles (limit {max})")]
    TooManyTopLevelTiles { count: u64, max: u64 },
}

/// Errors reported by fetch work and synchronous loads.
///
/// The engine does not inspect the variant; any error marks the tile's
/// region resource-absent. Variants exist for collaborators and logs.
#[derive(Debug, Error)]
pub enum FetchError {
    /// I/O error while reading or persisting content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content does not exist at the source.
    #[error("Content not found: {0}")]
    NotFound(String),

    /// Persisted content was corrupt and has been removed.
    #[error("Corrupt content for {key}: {detail}")]
    Corrupt { key: String, detail: String },

    /// Content could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Any other collaborator failure.
    #[error("Fetch failed: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_error_display() {
        let err = HierarchyError::LevelOutOfRange { level: 7, count: 3 };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains('3'));

        let err = HierarchyError::FinestLevel { level: 2 };
        assert_eq!(err.to_string(), "Cannot subdivide tile at finest level 2");
    }

    #[test]
    fn test_too_many_tiles_display() {
        let err = HierarchyError::TooManyTopLevelTiles {
            count: 5_000_000,
            max: 1_048_576,
        };
        assert_eq!(
            err.to_string(),
            "Level-zero delta needs 5000000 top-level tiles (limit 1048576)"
        );
    }

    #[test]
    fn test_fetch_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FetchError = io_err.into();
        assert!(matches!(err, FetchError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }
}
