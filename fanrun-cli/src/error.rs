//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use fanrun::engine::ConfigError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid command-line usage
    Usage(String),
    /// Failed to read the targets file
    TargetsFile { path: String, error: std::io::Error },
    /// Engine rejected the configuration
    Engine(ConfigError),
    /// Failed to write results to stdout
    OutputWrite(std::io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Usage(_) = self {
            eprintln!();
            eprintln!("Run 'fanrun --help' for usage.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Usage(msg) => write!(f, "Invalid usage: {}", msg),
            CliError::TargetsFile { path, error } => {
                write!(f, "Failed to read targets file '{}': {}", path, error)
            }
            CliError::Engine(e) => write!(f, "Configuration error: {}", e),
            CliError::OutputWrite(e) => write!(f, "Failed to write results: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::TargetsFile { error, .. } => Some(error),
            CliError::Engine(e) => Some(e),
            CliError::OutputWrite(e) => Some(e),
            _ => None,
        }
    }
}
