//! Serialization of `ConfigFile` back to INI.

use ini::Ini;

use super::ConfigFile;

/// Builds an `Ini` holding every setting in `config`.
pub(super) fn to_ini(config: &ConfigFile) -> Ini {
    let mut ini = Ini::new();
    let layer = &config.layer;
    let h = &config.hierarchy;

    {
        let mut section = ini.with_section(Some("layer"));
        section
            .set("split_scale", layer.split_scale.to_string())
            .set("force_level_zero_loads", layer.force_level_zero_loads.to_string())
            .set("retain_level_zero_tiles", layer.retain_level_zero_tiles.to_string())
            .set("memory_cache_size", config.memory_cache_size.to_string());
        if let Some(expiry) = layer.expiry_override {
            section.set("expiry_override", expiry.to_rfc3339());
        }
        if let Some(dir) = &config.tile_directory {
            section.set("tile_directory", dir.display().to_string());
        }
    }

    let order = layer.request_order.name().unwrap_or_else(|| {
        tracing::warn!("Custom request order cannot be saved, writing fifo");
        "fifo"
    });
    ini.with_section(Some("requests"))
        .set("queue_capacity", layer.queue_capacity.to_string())
        .set("order", order)
        .set("pool_capacity", config.pool_capacity.to_string());

    ini.with_section(Some("absent"))
        .set("max_tries", layer.absent.max_tries.to_string())
        .set(
            "min_check_interval",
            layer.absent.min_check_interval.as_secs().to_string(),
        )
        .set(
            "try_again_interval",
            layer.absent.try_again_interval.as_secs().to_string(),
        )
        .set("max_entries", layer.absent.max_entries.to_string());

    {
        let inactive = h
            .inactive_levels
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let sector = h.sector;

        let mut section = ini.with_section(Some("hierarchy"));
        section
            .set("cache_name", h.cache_name.as_str())
            .set("format_suffix", h.format_suffix.as_str())
            .set("num_levels", h.num_levels.to_string())
            .set("num_empty_levels", h.num_empty_levels.to_string())
            .set("inactive_levels", inactive)
            .set("level_zero_delta_lat", h.level_zero_delta_lat.to_string())
            .set("level_zero_delta_lon", h.level_zero_delta_lon.to_string())
            .set("tile_width", h.tile_width.to_string())
            .set("tile_height", h.tile_height.to_string())
            .set("origin_lat", h.origin_lat.to_string())
            .set("origin_lon", h.origin_lon.to_string())
            .set(
                "sector",
                format!(
                    "{}, {}, {}, {}",
                    sector.south(),
                    sector.north(),
                    sector.west(),
                    sector.east()
                ),
            );
        if let Some(expiry) = h.expiry {
            section.set("expiry", expiry.to_rfc3339());
        }
        for (level, expiry) in &h.level_expiry {
            section.set(format!("expiry.{}", level), expiry.to_rfc3339());
        }
    }

    let d = &layer.diagnostics;
    ini.with_section(Some("diagnostics"))
        .set("tile_outlines", d.tile_outlines.to_string())
        .set("tile_ids", d.tile_ids.to_string())
        .set("bounding_volumes", d.bounding_volumes.to_string());

    ini
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_every_section() {
        let ini = to_ini(&ConfigFile::default());
        for name in ["layer", "requests", "absent", "hierarchy", "diagnostics"] {
            assert!(ini.section(Some(name)).is_some(), "missing [{}]", name);
        }
        assert_eq!(ini.get_from(Some("requests"), "order"), Some("fifo"));
        assert_eq!(ini.get_from(Some("hierarchy"), "num_levels"), Some("12"));
    }

    #[test]
    fn test_unset_optionals_are_omitted() {
        let ini = to_ini(&ConfigFile::default());
        assert!(ini.get_from(Some("layer"), "expiry_override").is_none());
        assert!(ini.get_from(Some("layer"), "tile_directory").is_none());
    }
}
