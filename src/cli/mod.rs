//! Command-line interface components
//!
//! This module contains CLI-specific code for the evalstream application,
//! including argument parsing, progress display, and command handlers.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{Cli, Commands, ConfigAction, ConfigArgs, GlobalArgs, RunArgs};
pub use commands::{format_results_table, handle_config, handle_run, load_items};
pub use progress::{status_line, ProgressConfig, ProgressDisplay};
