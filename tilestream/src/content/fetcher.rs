//! Tile content sources.
//!
//! A [`TileFetcher`] loads the raw bytes for one tile. It runs on worker
//! threads (or synchronously for forced level-0 loads) and is responsible
//! for its own timeouts and for cleaning up corrupt artifacts it finds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::FetchError;
use crate::tile::Tile;

/// Source of raw tile content.
pub trait TileFetcher: Send + Sync + 'static {
    /// Loads the content for `tile`.
    fn fetch(&self, tile: &Tile) -> Result<Bytes, FetchError>;
}

impl<F> TileFetcher for F
where
    F: Fn(&Tile) -> Result<Bytes, FetchError> + Send + Sync + 'static,
{
    fn fetch(&self, tile: &Tile) -> Result<Bytes, FetchError> {
        self(tile)
    }
}

/// Reads tiles from a directory tree.
///
/// Tiles are laid out as `<root>/<namespace>/<row>/<row>_<col><suffix>`,
/// where the namespace is the level's cache name (e.g. `imagery/3`) and the
/// suffix comes from the level descriptor (e.g. `.dds`).
///
/// A zero-length file is treated as corrupt: it is deleted before the
/// failure is reported so the next attempt starts clean.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `tile`'s content.
    pub fn tile_path(&self, tile: &Tile) -> PathBuf {
        let row = tile.row();
        let col = tile.col();
        let mut path = self.root.clone();
        for segment in tile.level().cache_name().split('/') {
            path.push(segment);
        }
        path.push(row.to_string());
        path.push(format!(
            "{}_{}{}",
            row,
            col,
            tile.level().format_suffix()
        ));
        path
    }
}

impl TileFetcher for DirectoryFetcher {
    fn fetch(&self, tile: &Tile) -> Result<Bytes, FetchError> {
        let path = self.tile_path(tile);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(FetchError::Io(e)),
        };

        if data.is_empty() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete corrupt tile");
            }
            return Err(FetchError::Corrupt {
                key: tile.key().to_string(),
                detail: "zero-length file".to_string(),
            });
        }

        tracing::trace!(key = %tile.key(), bytes = data.len(), "Read tile from disk");
        Ok(Bytes::from(data))
    }
}
