//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// adb location
    #[serde(default)]
    pub adb: AdbConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Run pipeline settings
    #[serde(default)]
    pub run: RunSettings,
}

/// adb settings
#[derive(Debug, Deserialize, Default)]
pub struct AdbConfig {
    /// Explicit path to the adb binary; searched for when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for clearing the device log before a run
    #[serde(default = "default_log_clear")]
    pub log_clear_secs: u64,

    /// Timeout for the whole instrumentation run (none by default)
    #[serde(default)]
    pub instrumentation_secs: Option<u64>,

    /// Timeout for a single artifact pull
    #[serde(default)]
    pub pull_secs: Option<u64>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            log_clear_secs: default_log_clear(),
            instrumentation_secs: None,
            pull_secs: None,
        }
    }
}

fn default_log_clear() -> u64 {
    5
}

/// Run pipeline settings
#[derive(Debug, Deserialize)]
pub struct RunSettings {
    /// Maximum number of concurrent artifact pulls per device
    #[serde(default = "default_pull_concurrency")]
    pub pull_concurrency: usize,

    /// How often the log tail checks for new content
    #[serde(default = "default_log_poll_interval")]
    pub log_poll_interval_ms: u64,

    /// Base folder on the device holding per-test screenshot folders
    #[serde(default = "default_screenshots_folder")]
    pub screenshots_folder: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            pull_concurrency: default_pull_concurrency(),
            log_poll_interval_ms: default_log_poll_interval(),
            screenshots_folder: default_screenshots_folder(),
        }
    }
}

fn default_pull_concurrency() -> usize {
    4
}
fn default_log_poll_interval() -> u64 {
    100
}
fn default_screenshots_folder() -> String {
    "/sdcard/screenshots".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    pub fn log_clear_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.log_clear_secs)
    }

    pub fn instrumentation_timeout(&self) -> Option<Duration> {
        self.timeouts.instrumentation_secs.map(Duration::from_secs)
    }

    pub fn pull_timeout(&self) -> Option<Duration> {
        self.timeouts.pull_secs.map(Duration::from_secs)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.run.log_poll_interval_ms)
    }
}
