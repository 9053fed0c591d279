//! CLI subcommands.

pub mod inspect;
pub mod simulate;

use std::path::Path;

use tilestream::config::ConfigFile;

use crate::error::CliError;

/// Loads the configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}
