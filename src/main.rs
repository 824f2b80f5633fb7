//! instrumentor - runs Android instrumentation suites across devices
//!
//! Collects per-test results, per-test device logs and screenshots for
//! every connected device in parallel.

use std::path::PathBuf;

use clap::Parser;
use instrumentor::common::config::Config;
use instrumentor::common::logging;
use instrumentor::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "instrumentor", about = "Android instrumentation test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Config file (default: the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging and pull failure warnings
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, config, cli.verbose).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
