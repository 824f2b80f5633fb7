//! Error types for the instrumentation runner
//!
//! Only failures that abort a device run surface as errors. Unrecognized
//! output lines, failed artifact pulls and cleanup problems are handled
//! where they happen and never reach the caller.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the instrumentation runner
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' did not finish within {timeout_secs} seconds and was killed")]
    Expired { command: String, timeout_secs: u64 },

    #[error("'{command}' exited with code {code:?}")]
    ProcessFailed { command: String, code: Option<i32> },

    #[error("Process started without an output stream")]
    OutputStreamMissing,

    #[error("Process notifications ended before the process exited")]
    NotificationStreamClosed,

    // === Device Errors ===
    #[error("adb not found. Searched: {searched}. Set ANDROID_HOME or [adb] path in the config file")]
    AdbNotFound { searched: String },

    #[error("No connected devices found")]
    NoDevices,

    #[error("Device '{0}' is not connected")]
    DeviceNotFound(String),

    #[error("Failed to pull '{device_path}': {reason}")]
    PullFailed { device_path: String, reason: String },

    #[error("Failed to clear device log: {0}")]
    LogClearFailed(String),

    // === Run Errors ===
    #[error("{failed_tests} test(s) failed, {failed_devices} device run(s) errored")]
    RunFailed {
        failed_tests: usize,
        failed_devices: usize,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch error for a command line
    pub fn launch(command: &str, source: io::Error) -> Self {
        Self::Launch {
            command: command.to_string(),
            source,
        }
    }

    /// Create an expired error for a command line
    pub fn expired(command: &str, timeout: std::time::Duration) -> Self {
        Self::Expired {
            command: command.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create a pull failed error
    pub fn pull_failed(device_path: &str, reason: impl ToString) -> Self {
        Self::PullFailed {
            device_path: device_path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the device run.
    ///
    /// Pull and log-clear failures only degrade the result.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::PullFailed { .. } | Error::LogClearFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_and_clear_failures_are_not_fatal() {
        assert!(!Error::pull_failed("/sdcard/x", "device offline").is_fatal());
        assert!(!Error::LogClearFailed("timeout".into()).is_fatal());
        assert!(Error::expired("adb logcat -c", std::time::Duration::from_secs(5)).is_fatal());
    }

    #[test]
    fn test_expired_message_mentions_timeout() {
        let err = Error::expired("adb shell am instrument", std::time::Duration::from_secs(30));
        assert_eq!(
            err.to_string(),
            "'adb shell am instrument' did not finish within 30 seconds and was killed"
        );
    }
}
