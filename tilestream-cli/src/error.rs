//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use tilestream::config::ConfigFileError;
use tilestream::error::HierarchyError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Hierarchy settings are inconsistent
    Hierarchy(HierarchyError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Command-line value out of range
    InvalidArgument(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(_) = self {
            eprintln!();
            eprintln!("Check the file passed with --config, or ~/.tilestream/config.ini.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Hierarchy(e) => write!(f, "Invalid tile hierarchy: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Hierarchy(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<HierarchyError> for CliError {
    fn from(e: HierarchyError) -> Self {
        CliError::Hierarchy(e)
    }
}
