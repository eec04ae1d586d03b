//! fetch-relay: request-interception relay
//!
//! This is the main entry point for the fetch-relay binary. It handles CLI
//! argument parsing, configuration loading, and logging setup, then hands off
//! to the selected subcommand.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: goes to syslog when enabled, never to stdout/stderr
//! - **Debug logging**: `tracing` output on stderr
//! - **Command output**: `probe` prints its results on stdout

use anyhow::{Context, Result};
use clap::Parser;
use fetch_relay::{cli::Cli, cli_handler, config::ConfigLoader};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Loaded before tracing so the configured log level can apply.
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    cli_handler::handle_command(&cli.command, config)
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then the configured level, then warnings only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if configured_level.is_empty() {
                EnvFilter::new("warn")
            } else {
                EnvFilter::new(configured_level)
            }
        }),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
