//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// Slotmeter - rolling means over a remote random number source
///
/// Polls the source once per slot every cycle, waits for every request of
/// the cycle to settle, then sleeps for the interval and starts again.
///
/// While running, type a number (or `slots <n>`) to change the slot count,
/// `status` to print the current state, or `quit` to exit.
///
/// Examples:
///   slotmeter
///   slotmeter --slots 8 --interval-ms 2000
///   slotmeter --url http://localhost:8080/random --field value
///   slotmeter --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Endpoint returning a JSON body with a numeric field
    #[arg(long, value_name = "URL", env = "SLOTMETER_URL")]
    pub url: Option<String>,

    /// JSON field holding the sample
    #[arg(long, value_name = "NAME")]
    pub field: Option<String>,

    /// Number of slots at startup
    #[arg(short, long, value_name = "COUNT")]
    pub slots: Option<usize>,

    /// Delay between a settled cycle and the next one
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .slotmeter.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .slotmeter.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Source URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref field) = self.field {
            if field.trim().is_empty() {
                return Err("Field name must not be empty".to_string());
            }
        }

        if self.interval_ms == Some(0) {
            return Err("Interval must be at least 1 ms".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
