//! Command-line argument parsing for evalstream
//!
//! This module defines the CLI structure using clap derive macros: a `run`
//! command that streams one batch to the scoring service and a `config`
//! command for the configuration file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// evalstream - Stream batch evaluation results from a scoring service
#[derive(Parser, Debug)]
#[command(
    name = "evalstream",
    version,
    about = "Stream batch evaluation results from a scoring service",
    long_about = "Submits a batch of conversations to a scoring service and follows the streamed results.
Reconnects on transport failures without resubmitting finished items, and reports live progress."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a batch and stream its results
    Run(RunArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON file holding the items (an array, or an object with an "items" array)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Group key forwarded with the batch
    #[arg(short, long)]
    pub group_key: Option<String>,

    /// Concurrency requested from the scoring service
    #[arg(short = 'c', long)]
    pub max_concurrency: Option<u32>,

    /// Scoring service base URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Print the final snapshot as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a commented default configuration file
    Init {
        /// Destination (defaults to the user config directory)
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Logging level requested on the command line, if any
    ///
    /// `None` means no verbosity flag was given and the configured level
    /// applies.
    pub fn log_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }
}

impl RunArgs {
    /// Reject values clap cannot check on its own
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == Some(0) {
            return Err("--max-concurrency must be greater than 0".to_string());
        }
        if matches!(&self.group_key, Some(key) if key.trim().is_empty()) {
            return Err("--group-key cannot be empty".to_string());
        }
        Ok(())
    }
}
