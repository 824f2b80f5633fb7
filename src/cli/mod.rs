//! CLI command handling
//!
//! Resolves devices, runs them and prints summaries.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::config::Config;
use crate::common::{format_clock, paths, Error, Result};
use crate::device::{Adb, Device, DeviceBridge};
use crate::instrumentation::TestOutcome;
use crate::run::{self, RunConfig, RunResult};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: Config, verbose: bool) -> Result<()> {
    let adb = Adb::locate(&config)?;
    tracing::debug!(adb = %adb.binary().display(), "Using adb");

    match command {
        Commands::Devices => {
            let devices = adb.connected_devices().await?;
            if devices.is_empty() {
                println!("No connected devices");
            } else {
                for device in &devices {
                    println!("{}", device);
                }
            }
            Ok(())
        }

        Commands::Run(args) => {
            let devices = select_devices(&adb, &args.devices).await?;
            let run_config = run_config(&config, args, verbose)?;
            let bridge: Arc<dyn DeviceBridge> = Arc::new(adb);

            let outcomes = run::run_devices(bridge, devices, &run_config).await;

            let mut failed_tests = 0;
            let mut failed_devices = 0;
            for (device, outcome) in &outcomes {
                match outcome {
                    Ok(result) => {
                        write_summary(&run_config.output_dir, result).await;
                        print_run(result);
                        failed_tests += result.failed_count();
                    }
                    Err(e) => {
                        println!("{} {}: {}", "✗".red(), device.to_string().bold(), e);
                        failed_devices += 1;
                    }
                }
            }

            if failed_tests > 0 || failed_devices > 0 {
                Err(Error::RunFailed {
                    failed_tests,
                    failed_devices,
                })
            } else {
                Ok(())
            }
        }
    }
}

/// Explicit serials must all be connected; otherwise take every device
async fn select_devices(adb: &Adb, requested: &[String]) -> Result<Vec<Device>> {
    let connected = adb.connected_devices().await?;
    if requested.is_empty() {
        if connected.is_empty() {
            return Err(Error::NoDevices);
        }
        return Ok(connected);
    }

    requested
        .iter()
        .map(|serial| {
            connected
                .iter()
                .find(|device| device.id() == serial)
                .cloned()
                .ok_or_else(|| Error::DeviceNotFound(serial.clone()))
        })
        .collect()
}

/// Config file values overridden by command-line flags
fn run_config(config: &Config, args: RunArgs, verbose: bool) -> Result<RunConfig> {
    let mut run = RunConfig::from_config(config, args.test_package, args.test_runner, args.output_dir);
    run.instrumentation_arguments = args.instrumentation_arguments;
    run.verbose = verbose;
    run.use_test_services = args.use_test_services;
    if let Some(folder) = args.screenshots_folder {
        run.screenshots_folder = folder;
    }
    if let Some(secs) = args.instrumentation_timeout {
        run.instrumentation_timeout = Some(std::time::Duration::from_secs(secs));
    }
    if let Some(concurrency) = args.pull_concurrency {
        run.pull_concurrency = concurrency;
    }

    if run.pull_concurrency == 0 {
        return Err(Error::Config("pull concurrency must be at least 1".to_string()));
    }
    Ok(run)
}

async fn write_summary(output_dir: &Path, result: &RunResult) {
    let logs_dir = paths::logs_dir(output_dir, result.device());
    let path = paths::run_result_file(&logs_dir);
    match result.write_json(&path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Wrote run summary"),
        Err(e) => tracing::warn!(path = %path.display(), "Could not write run summary: {}", e),
    }
}

fn print_run(result: &RunResult) {
    let status = if result.failed_count() == 0 {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{} {} {} passed, {} failed, {} ignored in {}",
        status,
        result.device().to_string().bold(),
        result.passed_count().to_string().green(),
        result.failed_count().to_string().red(),
        result.ignored_count().to_string().yellow(),
        format_clock(result.duration().as_millis() as u64).dimmed()
    );

    for test in result.tests() {
        if let TestOutcome::Failed { stacktrace } = &test.outcome {
            println!("    {} {}.{}", "✗".red(), test.class_name, test.test_name);
            if let Some(first) = stacktrace.lines().next() {
                println!("      {}", first.dimmed());
            }
        }
    }
}
