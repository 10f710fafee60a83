//! evalstream CLI application
//!
//! Command-line interface for streaming batch evaluations from a scoring
//! service, with live progress, reconnects and a final per-item report.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use evalstream::cli::{handle_config, handle_run, Cli, Commands};
use evalstream::config::{AppConfig, LoggingConfig};
use evalstream::errors::Result;

#[tokio::main]
async fn main() {
    // Initialize program
    let result = run().await;

    // Handle any errors that occurred
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // `config init` must work even when the current file is broken, so the
    // load error is only raised by commands that need the configuration
    let loaded = AppConfig::load(cli.global.config.clone()).await;
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_logging(&cli, &logging);

    info!("evalstream v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => {
            info!("Executing run command");
            handle_run(args, loaded?).await
        }
        Commands::Config(args) => {
            info!("Executing config command");
            handle_config(args, loaded).await
        }
    }
}

/// Initialize logging from CLI verbosity, falling back to the configured level
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let level = cli
        .log_level()
        .map(|level| level.to_string().to_lowercase())
        .unwrap_or_else(|| logging.level.to_lowercase());

    let mut filter = EnvFilter::from_default_env();
    match format!("evalstream={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level {:?}: {}", level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_level(cli.global.very_verbose)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
