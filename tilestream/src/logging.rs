//! Logging infrastructure.
//!
//! Installs a global `tracing` subscriber with two outputs:
//! - a log file (cleared at session start) written through a non-blocking
//!   `tracing-appender` worker
//! - stdout, for following a running session
//!
//! The level filter comes from `RUST_LOG` and defaults to `info`. Per-frame
//! summaries are logged at `debug`, per-tile decisions at `trace`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::config_directory;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes logging to `log_dir/log_file` and stdout.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created, the log file
/// cannot be cleared, or a global subscriber is already installed.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    init_logging_with_filter(log_dir, log_file, DEFAULT_LOG_FILTER)
}

/// Like [`init_logging`] with an explicit fallback filter (e.g. `"debug"`).
pub fn init_logging_with_filter(
    log_dir: &Path,
    log_file: &str,
    default_filter: &str,
) -> Result<LoggingGuard, io::Error> {
    let log_path = prepare_log_file(log_dir, log_file)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    tracing::debug!(path = %log_path.display(), "Logging initialized");

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Creates the log directory and truncates the log file.
fn prepare_log_file(log_dir: &Path, log_file: &str) -> Result<PathBuf, io::Error> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(log_file);
    fs::write(&log_path, "")?;
    Ok(log_path)
}

/// Default log directory (`~/.tilestream/logs`).
pub fn default_log_dir() -> PathBuf {
    config_directory().join("logs")
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "tilestream.log"
}
