//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ini::{Ini, Properties};

use super::{ConfigFile, ConfigFileError};
use crate::geo::Sector;
use crate::request::RequestOrder;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [layer] section
    if let Some(section) = ini.section(Some("layer")) {
        let s = Section::new("layer", section);
        if let Some(v) = s.number::<f64>("split_scale", "must be a number")? {
            config.layer.split_scale = v;
        }
        if let Some(v) = s.boolean("force_level_zero_loads")? {
            config.layer.force_level_zero_loads = v;
        }
        if let Some(v) = s.boolean("retain_level_zero_tiles")? {
            config.layer.retain_level_zero_tiles = v;
        }
        if let Some(v) = s.get("expiry_override") {
            config.layer.expiry_override = s.optional_timestamp("expiry_override", v)?;
        }
        if let Some(v) = s.get("memory_cache_size") {
            config.memory_cache_size = parse_size(v).ok_or_else(|| {
                s.invalid(
                    "memory_cache_size",
                    v,
                    "expected format like '512MB', '2GB', or '1024KB'",
                )
            })?;
        }
        if let Some(v) = s.get("tile_directory") {
            config.tile_directory = (!v.is_empty()).then(|| expand_tilde(v));
        }
    }

    // [requests] section
    if let Some(section) = ini.section(Some("requests")) {
        let s = Section::new("requests", section);
        if let Some(v) = s.number::<usize>("queue_capacity", "must be a positive integer")? {
            config.layer.queue_capacity = v;
        }
        if let Some(v) = s.get("order") {
            config.layer.request_order = RequestOrder::from_name(v).ok_or_else(|| {
                s.invalid("order", v, "must be one of: fifo, coarsest, finest, priority")
            })?;
        }
        if let Some(v) = s.number::<usize>("pool_capacity", "must be a positive integer")? {
            if v == 0 {
                return Err(s.invalid("pool_capacity", "0", "must be at least 1"));
            }
            config.pool_capacity = v;
        }
    }

    // [absent] section
    if let Some(section) = ini.section(Some("absent")) {
        let s = Section::new("absent", section);
        if let Some(v) = s.number::<u32>("max_tries", "must be a positive integer")? {
            config.layer.absent.max_tries = v;
        }
        if let Some(v) = s.number::<u64>("min_check_interval", "must be a whole number of seconds")? {
            config.layer.absent.min_check_interval = Duration::from_secs(v);
        }
        if let Some(v) = s.number::<u64>("try_again_interval", "must be a whole number of seconds")? {
            config.layer.absent.try_again_interval = Duration::from_secs(v);
        }
        if let Some(v) = s.number::<u64>("max_entries", "must be a positive integer")? {
            if v == 0 {
                return Err(s.invalid("max_entries", "0", "must be at least 1"));
            }
            config.layer.absent.max_entries = v;
        }
    }

    // [hierarchy] section
    if let Some(section) = ini.section(Some("hierarchy")) {
        let s = Section::new("hierarchy", section);
        let h = &mut config.hierarchy;

        if let Some(v) = s.get("cache_name") {
            if v.is_empty() {
                return Err(s.invalid("cache_name", v, "must not be empty"));
            }
            h.cache_name = v.to_string();
        }
        if let Some(v) = s.get("format_suffix") {
            h.format_suffix = v.to_string();
        }
        if let Some(v) = s.number::<usize>("num_levels", "must be a positive integer")? {
            h.num_levels = v;
        }
        if let Some(v) = s.number::<usize>("num_empty_levels", "must be a non-negative integer")? {
            h.num_empty_levels = v;
        }
        if let Some(v) = s.get("inactive_levels") {
            h.inactive_levels = parse_list::<usize>(v)
                .ok_or_else(|| s.invalid("inactive_levels", v, "expected a list like '3, 5'"))?
                .into_iter()
                .collect();
        }
        if let Some(v) = s.number::<f64>("level_zero_delta", "must be degrees")? {
            h.level_zero_delta_lat = v;
            h.level_zero_delta_lon = v;
        }
        if let Some(v) = s.number::<f64>("level_zero_delta_lat", "must be degrees")? {
            h.level_zero_delta_lat = v;
        }
        if let Some(v) = s.number::<f64>("level_zero_delta_lon", "must be degrees")? {
            h.level_zero_delta_lon = v;
        }
        if let Some(v) = s.number::<u32>("tile_size", "must be a positive integer")? {
            h.tile_width = v;
            h.tile_height = v;
        }
        if let Some(v) = s.number::<u32>("tile_width", "must be a positive integer")? {
            h.tile_width = v;
        }
        if let Some(v) = s.number::<u32>("tile_height", "must be a positive integer")? {
            h.tile_height = v;
        }
        if let Some(v) = s.number::<f64>("origin_lat", "must be degrees")? {
            h.origin_lat = v;
        }
        if let Some(v) = s.number::<f64>("origin_lon", "must be degrees")? {
            h.origin_lon = v;
        }
        if let Some(v) = s.get("sector") {
            h.sector = parse_sector(v).ok_or_else(|| {
                s.invalid("sector", v, "expected 'south, north, west, east' in degrees")
            })?;
        }
        if let Some(v) = s.get("expiry") {
            h.expiry = s.optional_timestamp("expiry", v)?;
        }
        for (key, value) in section.iter() {
            let Some(level) = key.strip_prefix("expiry.") else {
                continue;
            };
            let level: usize = level
                .parse()
                .map_err(|_| s.invalid(key, value, "level must be an integer"))?;
            match s.optional_timestamp(key, value)? {
                Some(ts) => h.level_expiry.insert(level, ts),
                None => h.level_expiry.remove(&level),
            };
        }
    }

    // [diagnostics] section
    if let Some(section) = ini.section(Some("diagnostics")) {
        let s = Section::new("diagnostics", section);
        let d = &mut config.layer.diagnostics;
        if let Some(v) = s.boolean("tile_outlines")? {
            d.tile_outlines = v;
        }
        if let Some(v) = s.boolean("tile_ids")? {
            d.tile_ids = v;
        }
        if let Some(v) = s.boolean("bounding_volumes")? {
            d.bounding_volumes = v;
        }
    }

    Ok(config)
}

// =============================================================================
// Helpers
// =============================================================================

/// One INI section with typed accessors that report the failing key.
struct Section<'a> {
    name: &'static str,
    props: &'a Properties,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, props: &'a Properties) -> Self {
        Self { name, props }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.props.get(key).map(str::trim)
    }

    fn invalid(&self, key: &str, value: &str, reason: &str) -> ConfigFileError {
        ConfigFileError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn number<T: FromStr>(&self, key: &str, reason: &str) -> Result<Option<T>, ConfigFileError> {
        self.get(key)
            .map(|v| v.parse().map_err(|_| self.invalid(key, v, reason)))
            .transpose()
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, ConfigFileError> {
        self.get(key)
            .map(|v| parse_bool(v).ok_or_else(|| self.invalid(key, v, "must be true or false")))
            .transpose()
    }

    /// Empty or `none` clears the timestamp.
    fn optional_timestamp(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<DateTime<Utc>>, ConfigFileError> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(value)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| self.invalid(key, value, "expected an RFC 3339 timestamp"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_list<T: FromStr>(value: &str) -> Option<Vec<T>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse().ok())
        .collect()
}

fn parse_sector(value: &str) -> Option<Sector> {
    let bounds = parse_list::<f64>(value)?;
    let [south, north, west, east] = bounds.as_slice() else {
        return None;
    };
    Sector::new(*south, *north, *west, *east).ok()
}

/// Parses a size such as `512MB`, `2GB`, `64KB` or a plain byte count.
pub fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim().to_uppercase();
    let (digits, multiplier) = if let Some(n) = value.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('B') {
        (n, 1)
    } else {
        (value.as_str(), 1)
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}
