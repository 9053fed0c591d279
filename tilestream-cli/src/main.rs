//! TileStream CLI - Command-line interface
//!
//! Drives the level-of-detail engine headlessly, either against a synthetic
//! tile source or a directory of tiles, and prints what it selects.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilestream::logging::{default_log_dir, default_log_file, init_logging_with_filter};

use commands::inspect::InspectArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tilestream")]
#[command(version = tilestream::VERSION)]
#[command(about = "Quadtree level-of-detail tile streaming", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.tilestream/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render frames from a fixed or descending eye and report per-frame stats
    Simulate(SimulateArgs),
    /// Show the level hierarchy and which tiles contain a position
    Inspect(InspectArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate(args) => {
            let filter = if cli.verbose { "debug" } else { "info" };
            let _guard = init_logging_with_filter(&default_log_dir(), default_log_file(), filter)
                .map_err(|e| CliError::LoggingInit(e.to_string()))?;
            tracing::info!(version = tilestream::VERSION, "TileStream simulation starting");
            commands::simulate::run(args, config)
        }
        Commands::Inspect(args) => commands::inspect::run(args, config.hierarchy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate_with_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "tilestream",
            "simulate",
            "--lat",
            "-33.9",
            "--lon",
            "151.2",
            "--frames",
            "3",
        ])
        .unwrap();

        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.lat, -33.9);
                assert_eq!(args.lon, 151.2);
                assert_eq!(args.frames, 3);
                assert!(!args.perspective);
            }
            Commands::Inspect(_) => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_parse_inspect_requires_both_coordinates() {
        assert!(Cli::try_parse_from(["tilestream", "inspect", "--lat", "10"]).is_err());
        assert!(Cli::try_parse_from(["tilestream", "inspect", "--lat", "10", "--lon", "20"]).is_ok());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["tilestream", "inspect", "--config", "/tmp/t.ini"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.ini")));
    }
}
