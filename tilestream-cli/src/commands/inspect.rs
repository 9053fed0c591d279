//! `tilestream inspect`: print the level hierarchy and tile addressing.

use clap::Args;
use tilestream::level::{HierarchyConfig, LevelHierarchy};

use crate::error::CliError;

/// Arguments for `inspect`.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Latitude to resolve at every level, in decimal degrees
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude to resolve at every level, in decimal degrees
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Override the number of levels from the config file
    #[arg(long)]
    pub levels: Option<usize>,
}

/// Run the inspect command.
pub fn run(args: InspectArgs, mut config: HierarchyConfig) -> Result<(), CliError> {
    if let Some(levels) = args.levels {
        config.num_levels = levels;
    }
    let hierarchy = LevelHierarchy::new(&config)?;

    println!("Hierarchy '{}'", config.cache_name);
    println!("  Sector:          {}", hierarchy.sector());
    println!(
        "  Origin:          {}, {}",
        hierarchy.origin().0,
        hierarchy.origin().1
    );
    println!("  Top-level tiles: {}", hierarchy.top_level_tiles().len());
    println!();
    println!("  Level  Delta lat  Delta lon  Namespace             Empty  Expiry");
    for level in hierarchy.levels() {
        println!(
            "  {:>5}  {:>9.4}  {:>9.4}  {:<20}  {:<5}  {}",
            level.number(),
            level.delta_lat(),
            level.delta_lon(),
            level.cache_name(),
            if level.is_empty() { "yes" } else { "no" },
            level
                .expiry()
                .map_or_else(|| "-".to_string(), |e| e.to_rfc3339()),
        );
    }

    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        println!();
        println!("Tiles containing {}, {}:", lat, lon);
        for line in resolve_position(&hierarchy, lat, lon)? {
            println!("  {}", line);
        }
    }

    Ok(())
}

/// One line per level: the key and sector of the tile containing the position.
fn resolve_position(
    hierarchy: &LevelHierarchy,
    lat: f64,
    lon: f64,
) -> Result<Vec<String>, CliError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(CliError::InvalidArgument(format!(
            "position {}, {} is outside the globe",
            lat, lon
        )));
    }

    let mut lines = Vec::with_capacity(hierarchy.num_levels());
    for level in 0..hierarchy.num_levels() {
        let row = hierarchy.row_for_latitude(level, lat)?;
        let col = hierarchy.column_for_longitude(level, lon)?;
        let tile = hierarchy.create_tile(level, row, col)?;
        lines.push(format!(
            "L{:<2} {:<24} {}",
            level,
            tile.key().to_string(),
            tile.sector()
        ));
    }
    Ok(lines)
}
