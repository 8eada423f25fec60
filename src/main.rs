//! Gavel CLI entry point
//!
//! A thin composition layer: parse arguments, initialize logging, route to
//! the command implementations, and exit non-zero on failure.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gavel::cli::{execute_command, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = execute_command(cli.command).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
