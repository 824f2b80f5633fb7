//! Per-test and per-device results

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::artifacts::PulledFiles;
use crate::common::Result;
use crate::device::Device;
use crate::instrumentation::{TestId, TestOutcome};

/// Result of one test, including its log and pulled artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub device: Device,
    pub class_name: String,
    pub test_name: String,
    pub outcome: TestOutcome,
    #[serde(rename = "duration_nanos", serialize_with = "as_nanos")]
    pub duration: Duration,
    pub logcat: PathBuf,
    pub files: Vec<PathBuf>,
    pub screenshots: Vec<PathBuf>,
}

impl TestResult {
    pub fn new(
        device: Device,
        test: TestId,
        outcome: TestOutcome,
        duration: Duration,
        logcat: PathBuf,
        pulled: PulledFiles,
    ) -> Self {
        Self {
            device,
            class_name: test.class_name,
            test_name: test.test_name,
            outcome,
            duration,
            logcat,
            files: pulled.files,
            screenshots: pulled.screenshots,
        }
    }
}

/// Result of a whole device run
///
/// Counts are derived from `tests` at construction.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    device: Device,
    tests: Vec<TestResult>,
    passed_count: usize,
    ignored_count: usize,
    failed_count: usize,
    #[serde(rename = "duration_nanos", serialize_with = "as_nanos")]
    duration: Duration,
    timestamp_millis: u64,
    logcat: PathBuf,
    instrumentation_output: PathBuf,
}

impl RunResult {
    pub fn new(
        device: Device,
        tests: Vec<TestResult>,
        duration: Duration,
        timestamp_millis: u64,
        logcat: PathBuf,
        instrumentation_output: PathBuf,
    ) -> Self {
        let count = |f: fn(&TestOutcome) -> bool| tests.iter().filter(|t| f(&t.outcome)).count();
        let passed_count = count(|o| matches!(o, TestOutcome::Passed));
        let ignored_count = count(|o| matches!(o, TestOutcome::Ignored { .. }));
        let failed_count = count(|o| matches!(o, TestOutcome::Failed { .. }));

        Self {
            device,
            tests,
            passed_count,
            ignored_count,
            failed_count,
            duration,
            timestamp_millis,
            logcat,
            instrumentation_output,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn tests(&self) -> &[TestResult] {
        &self.tests
    }

    pub fn passed_count(&self) -> usize {
        self.passed_count
    }

    pub fn ignored_count(&self) -> usize {
        self.ignored_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp_millis
    }

    /// Full device log of the run
    pub fn logcat(&self) -> &Path {
        &self.logcat
    }

    /// Raw `am instrument` output
    pub fn instrumentation_output(&self) -> &Path {
        &self.instrumentation_output
    }

    /// Write the result as pretty JSON
    pub async fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

fn as_nanos<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_nanos().min(u64::MAX as u128) as u64)
}
