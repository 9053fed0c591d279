//! Configuration file handling for `~/.tilestream/config.ini`.
//!
//! Loads and saves user configuration with defaults for every key. Parsing
//! lives in [`parser`](self::parser), serialization in [`writer`](self::writer).
//!
//! # Sections
//!
//! ```ini
//! [layer]
//! split_scale = 0.9
//! force_level_zero_loads = false
//! retain_level_zero_tiles = false
//! expiry_override = 2024-05-01T00:00:00Z
//! memory_cache_size = 512MB
//! tile_directory = ~/tiles
//!
//! [requests]
//! queue_capacity = 200
//! order = fifo
//! pool_capacity = 16
//!
//! [absent]
//! max_tries = 2
//! min_check_interval = 10
//! try_again_interval = 3600
//! max_entries = 10000
//!
//! [hierarchy]
//! cache_name = imagery
//! format_suffix = .dds
//! num_levels = 12
//! level_zero_delta = 36
//!
//! [diagnostics]
//! tile_outlines = false
//! ```

mod parser;
mod writer;

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::content::DEFAULT_CACHE_SIZE_BYTES;
use crate::layer::LayerConfig;
use crate::level::HierarchyConfig;
use crate::pool::DEFAULT_POOL_CAPACITY;

pub use parser::parse_size;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Everything configurable from the INI file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub layer: LayerConfig,
    pub hierarchy: HierarchyConfig,
    /// Size bound of the in-memory content cache.
    pub memory_cache_size: u64,
    /// Concurrent fetches in the worker pool.
    pub pool_capacity: usize,
    /// Root of an on-disk tile tree, if content is read from disk.
    pub tile_directory: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            layer: LayerConfig::default(),
            hierarchy: HierarchyConfig::default(),
            memory_cache_size: DEFAULT_CACHE_SIZE_BYTES,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            tile_directory: None,
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tilestream/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        let config = parser::parse_ini(&ini)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        writer::to_ini(self)
            .write_to_file(path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }
}

/// Get the path to the config directory (~/.tilestream).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilestream")
}

/// Get the path to the config file (~/.tilestream/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
