//! CLI command definitions
//!
//! Defines the clap commands for the instrumentor CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run an instrumentation suite on connected devices
    Run(RunArgs),

    /// List devices ready for a run
    Devices,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Package of the instrumentation (test) APK
    #[arg(long)]
    pub test_package: String,

    /// Instrumentation runner class
    #[arg(long, default_value = "androidx.test.runner.AndroidJUnitRunner")]
    pub test_runner: String,

    /// Extra instrumentation argument, passed as `-e KEY VALUE`.
    /// Can be specified multiple times: -e class=com.x.ClassA -e debug=false
    #[arg(long = "instrumentation-argument", short = 'e', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub instrumentation_arguments: Vec<(String, String)>,

    /// Device serial to run on (default: every connected device)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Directory receiving logs, artifacts and run summaries
    #[arg(long, short = 'o', default_value = "instrumentor-output")]
    pub output_dir: PathBuf,

    /// Base folder on the device holding per-test screenshot folders
    #[arg(long)]
    pub screenshots_folder: Option<String>,

    /// Run `am instrument` through the androidx test services shell
    #[arg(long)]
    pub use_test_services: bool,

    /// Kill the instrumentation after this many seconds
    #[arg(long, value_name = "SECS")]
    pub instrumentation_timeout: Option<u64>,

    /// Maximum concurrent artifact pulls per device
    #[arg(long)]
    pub pull_concurrency: Option<usize>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("class=com.x.ClassA#testA").unwrap(),
            ("class".to_string(), "com.x.ClassA#testA".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
