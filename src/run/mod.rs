//! Device runs
//!
//! [`run_tests`] drives one device. The instrumentation process and the
//! log capture start concurrently; parser events turn into test results
//! as each test's artifacts are pulled, and the run completes once the
//! tests are collected, the log capture is up and the instrumentation
//! process has exited. Any failure terminates the device's background
//! processes before the error is returned.

mod join;
mod result;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::artifacts;
use crate::common::config::Config;
use crate::common::{format_duration, paths, Error, Result};
use crate::device::{Device, DeviceBridge};
use crate::instrumentation::{InstrumentationEvent, InstrumentationParser};
use crate::logcat::{spawn_demux, DemuxTask};
use crate::process::{Notification, OutputLines, ProcessGuard, ProcessHandle, SpawnOptions};

pub use join::{RunJoin, RunPhase};
pub use result::{RunResult, TestResult};

/// Runs `am instrument` through the test services shell executor
const TEST_SERVICES_PREFIX: &str = "CLASSPATH=$(pm path androidx.test.services) app_process / androidx.test.services.shellexecutor.ShellMain ";

/// Time the terminated log follower gets to flush its output
const FOLLOWER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a run, shared by every device
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub test_package: String,
    pub test_runner: String,
    /// Passed to `am instrument` as `-e <key> <value>`
    pub instrumentation_arguments: Vec<(String, String)>,
    pub output_dir: PathBuf,
    pub verbose: bool,
    pub use_test_services: bool,
    /// Base folder on the device holding per-test artifact folders
    pub screenshots_folder: String,
    pub instrumentation_timeout: Option<Duration>,
    pub log_clear_timeout: Duration,
    pub pull_concurrency: usize,
    pub log_poll_interval: Duration,
}

impl RunConfig {
    pub fn new(
        test_package: impl Into<String>,
        test_runner: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::from_config(&Config::default(), test_package, test_runner, output_dir)
    }

    /// Take timeouts and run settings from the config file
    pub fn from_config(
        config: &Config,
        test_package: impl Into<String>,
        test_runner: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            test_package: test_package.into(),
            test_runner: test_runner.into(),
            instrumentation_arguments: Vec::new(),
            output_dir: output_dir.into(),
            verbose: false,
            use_test_services: false,
            screenshots_folder: config.run.screenshots_folder.clone(),
            instrumentation_timeout: config.instrumentation_timeout(),
            log_clear_timeout: config.log_clear_timeout(),
            pull_concurrency: config.run.pull_concurrency,
            log_poll_interval: config.log_poll_interval(),
        }
    }

    /// Bridge arguments starting the instrumentation
    pub fn instrument_args(&self) -> Vec<String> {
        let prefix = if self.use_test_services {
            TEST_SERVICES_PREFIX
        } else {
            ""
        };

        let mut extras = String::new();
        for (key, value) in &self.instrumentation_arguments {
            extras.push_str(&format!("-e {} {} ", key, value));
        }

        vec![
            "shell".to_string(),
            format!(
                "{}am instrument -w -r {}{}/{}",
                prefix, extras, self.test_package, self.test_runner
            ),
        ]
    }
}

/// Running log capture: the follow process plus the demultiplexer
struct LogCapture {
    guard: ProcessGuard,
    follower: ProcessHandle,
    demux: DemuxTask,
}

impl LogCapture {
    /// Stop the follower, let it flush, then drain the demultiplexer
    async fn finish(self) -> usize {
        let LogCapture {
            guard,
            follower,
            demux,
        } = self;

        guard.release();
        match tokio::time::timeout(FOLLOWER_EXIT_TIMEOUT, follower.wait_exit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!("Log follower ended with error: {}", e),
            Err(_) => tracing::debug!("Log follower did not exit in time"),
        }
        demux.stop().await
    }
}

/// Run the suite on one device
pub async fn run_tests(
    bridge: Arc<dyn DeviceBridge>,
    device: &Device,
    config: &RunConfig,
) -> Result<RunResult> {
    tracing::info!(device = %device, "Starting tests...");
    let started_at = Instant::now();

    match drive(bridge, device, config, started_at).await {
        Ok(run) => Ok(run),
        Err(e) => {
            tracing::error!(device = %device, "Error during tests run: {}", e);
            Err(e)
        }
    }
}

async fn drive(
    bridge: Arc<dyn DeviceBridge>,
    device: &Device,
    config: &RunConfig,
    started_at: Instant,
) -> Result<RunResult> {
    let logs_dir = paths::logs_dir(&config.output_dir, device);
    tokio::fs::create_dir_all(&logs_dir).await?;
    let instrumentation_output = paths::instrumentation_output_file(&logs_dir);
    let full_logcat = paths::full_logcat_file(&logs_dir);

    let mut options = SpawnOptions::default().capture_to(&instrumentation_output);
    options.timeout = config.instrumentation_timeout;
    let mut instrumentation = bridge
        .execute(device, &config.instrument_args(), options)
        .await?;
    let instrumentation_guard = ProcessGuard::new("instrumentation", instrumentation.control());

    let output = match instrumentation.next_notification().await {
        Some(Ok(Notification::Started { pid, output })) => {
            tracing::debug!(device = %device, pid, "Instrumentation started");
            output
        }
        Some(Ok(Notification::Exited { .. })) => return Err(Error::OutputStreamMissing),
        Some(Err(e)) => return Err(e),
        None => return Err(Error::NotificationStreamClosed),
    };

    let (tests, log, exit_code) = {
        let tests = collect_tests(bridge.clone(), device, config, &logs_dir, output);
        let exit = instrumentation.wait_exit();
        let log = start_log_capture(bridge, device, config, &logs_dir, &full_logcat);
        tokio::pin!(tests, exit, log);

        let mut join = RunJoin::new();
        while join.phase() != RunPhase::Done {
            let step = tokio::select! {
                collected = &mut tests, if !join.has_tests() => collected.map(|t| join.tests_collected(t)),
                code = &mut exit, if !join.has_exit() => code.map(|c| join.instrumentation_exited(c)),
                capture = &mut log, if !join.has_log() => capture.map(|l| join.log_started(l)),
            };
            if let Err(e) = step {
                // Dropping the capture and the guard terminates both processes
                drop(join.fail());
                drop(instrumentation_guard);
                return Err(e);
            }
        }

        join.complete()
            .ok_or_else(|| Error::Internal("Run joined without all results".to_string()))?
    };
    instrumentation_guard.disarm();
    if exit_code != Some(0) {
        tracing::warn!(device = %device, "Instrumentation exited with code {:?}", exit_code);
    }

    let run = RunResult::new(
        device.clone(),
        tests,
        started_at.elapsed(),
        now_millis(),
        full_logcat,
        instrumentation_output,
    );
    tracing::info!(
        device = %device,
        "Test run finished, {} passed, {} failed, took {}",
        run.passed_count(),
        run.failed_count(),
        format_duration(run.duration())
    );

    let written = log.finish().await;
    tracing::debug!(device = %device, "Wrote {} per-test logs", written);
    Ok(run)
}

/// Parse instrumentation output into results, pulling each finished
/// test's artifacts. Results keep the order tests finished in.
async fn collect_tests(
    bridge: Arc<dyn DeviceBridge>,
    device: &Device,
    config: &RunConfig,
    logs_dir: &Path,
    mut output: OutputLines,
) -> Result<Vec<TestResult>> {
    let mut parser = InstrumentationParser::new();
    let permits = Arc::new(Semaphore::new(config.pull_concurrency.max(1)));
    let mut pulls = JoinSet::new();
    let mut finished = 0usize;

    while let Some(line) = output.next_line().await {
        for event in parser.feed(&line) {
            match event {
                InstrumentationEvent::Started { index, total, test } => {
                    tracing::debug!(device = %device, "Test {}/{} started: {}", index, total, test);
                }
                InstrumentationEvent::Finished {
                    index,
                    total,
                    test,
                    outcome,
                    duration,
                } => {
                    tracing::info!(
                        device = %device,
                        "Test {}/{} {} in {}: {}",
                        index,
                        total,
                        outcome.label(),
                        format_duration(duration),
                        test
                    );

                    let order = finished;
                    finished += 1;
                    let bridge = bridge.clone();
                    let permits = permits.clone();
                    let device = device.clone();
                    let output_dir = config.output_dir.clone();
                    let folder = config.screenshots_folder.clone();
                    let verbose = config.verbose;
                    let logcat = paths::test_logcat_file(logs_dir, &test.class_name, &test.test_name);

                    pulls.spawn(async move {
                        // A closed semaphore only means nothing else is waiting
                        let _permit = permits.acquire_owned().await.ok();
                        let pulled = artifacts::pull_test_files(
                            bridge.as_ref(),
                            &device,
                            &test,
                            &output_dir,
                            &folder,
                            verbose,
                        )
                        .await;
                        (order, TestResult::new(device, test, outcome, duration, logcat, pulled))
                    });
                }
            }
        }
    }

    if let Some(test) = parser.unfinished() {
        tracing::warn!(device = %device, "Test {} started but never finished", test);
    }

    let mut results = Vec::with_capacity(pulls.len());
    while let Some(joined) = pulls.join_next().await {
        let pulled = joined.map_err(|e| Error::Internal(format!("Artifact pull task failed: {}", e)))?;
        results.push(pulled);
    }
    results.sort_by_key(|(order, _)| *order);
    Ok(results.into_iter().map(|(_, result)| result).collect())
}

/// Clear the device log, start following it and start the demultiplexer
async fn start_log_capture(
    bridge: Arc<dyn DeviceBridge>,
    device: &Device,
    config: &RunConfig,
    logs_dir: &Path,
    full_logcat: &Path,
) -> Result<LogCapture> {
    match bridge.clear_log(device, config.log_clear_timeout).await {
        Ok(()) => tracing::debug!(device = %device, "Device log cleared"),
        Err(e) => tracing::warn!(device = %device, "Error attempting to clear logcat for device: {}", e),
    }

    let mut follower = bridge.follow_log_to_file(device, full_logcat).await?;
    let guard = ProcessGuard::new("logcat", follower.control());

    // Lines go to the file; the in-memory stream is not needed
    match follower.next_notification().await {
        Some(Ok(Notification::Started { pid, output })) => {
            drop(output);
            tracing::info!(device = %device, "Logcat parsing process started with PID {}", pid);
        }
        Some(Ok(Notification::Exited { code })) => {
            tracing::warn!(device = %device, "Logcat process exited immediately with code {:?}", code);
        }
        Some(Err(e)) => return Err(e),
        None => return Err(Error::NotificationStreamClosed),
    }

    let demux = spawn_demux(
        full_logcat.to_path_buf(),
        logs_dir.to_path_buf(),
        config.log_poll_interval,
    );
    Ok(LogCapture {
        guard,
        follower,
        demux,
    })
}

/// Run every device in parallel; one device failing leaves the others
/// running
pub async fn run_devices(
    bridge: Arc<dyn DeviceBridge>,
    devices: Vec<Device>,
    config: &RunConfig,
) -> Vec<(Device, Result<RunResult>)> {
    let runs = devices.into_iter().map(|device| {
        let bridge = bridge.clone();
        async move {
            let result = run_tests(bridge, &device, config).await;
            (device, result)
        }
    });
    futures_util::future::join_all(runs).await
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
