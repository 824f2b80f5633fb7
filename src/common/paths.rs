//! Configuration paths and the on-disk layout of a run's output
//!
//! Output layout under `<outputDir>`:
//! - `logs/<safeId>/instrumentation.output` raw `am instrument` output
//! - `logs/<safeId>/full.logcat` everything the device logged during the run
//! - `logs/<safeId>/<className>/<testName>.logcat` per-test log slices
//! - `logs/<safeId>/run.json` serialized run result
//! - `screenshots/<safeId>/<className>/<testName>/` pulled screenshots

use std::path::{Path, PathBuf};

use crate::device::Device;

/// Name used for the configuration directory
const APP_NAME: &str = "instrumentor";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/instrumentor/`
/// - macOS: `~/Library/Application Support/instrumentor/`
/// - Windows: `%APPDATA%\instrumentor\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Per-device log directory
pub fn logs_dir(output_dir: &Path, device: &Device) -> PathBuf {
    output_dir.join("logs").join(device.path_safe_id())
}

pub fn instrumentation_output_file(logs_dir: &Path) -> PathBuf {
    logs_dir.join("instrumentation.output")
}

pub fn full_logcat_file(logs_dir: &Path) -> PathBuf {
    logs_dir.join("full.logcat")
}

/// Per-test log slice written by the log demultiplexer
pub fn test_logcat_file(logs_dir: &Path, class_name: &str, test_name: &str) -> PathBuf {
    logs_dir.join(class_name).join(format!("{}.logcat", test_name))
}

pub fn run_result_file(logs_dir: &Path) -> PathBuf {
    logs_dir.join("run.json")
}

/// Host folder a test class's screenshot folders are pulled into
pub fn screenshots_class_dir(output_dir: &Path, device: &Device, class_name: &str) -> PathBuf {
    output_dir
        .join("screenshots")
        .join(device.path_safe_id())
        .join(class_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_output_layout_uses_path_safe_id() {
        let device = Device::new("192.168.1.1:5555");
        let out = Path::new("/tmp/out");

        let logs = logs_dir(out, &device);
        assert_eq!(logs, Path::new("/tmp/out/logs/192.168.1.1_5555"));
        assert_eq!(
            test_logcat_file(&logs, "com.x.ClassA", "testA"),
            Path::new("/tmp/out/logs/192.168.1.1_5555/com.x.ClassA/testA.logcat")
        );
        assert_eq!(
            screenshots_class_dir(out, &device, "com.x.ClassA"),
            Path::new("/tmp/out/screenshots/192.168.1.1_5555/com.x.ClassA")
        );
    }
}
