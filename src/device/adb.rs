//! adb-backed device bridge

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::process::{self, Notification, ProcessCommand, ProcessHandle, SpawnOptions};

use super::{Device, DeviceBridge};

/// Timeout for `adb devices`
const LIST_DEVICES_TIMEOUT: Duration = Duration::from_secs(10);

/// Device bridge driving the `adb` binary
#[derive(Debug, Clone)]
pub struct Adb {
    binary: PathBuf,
    pull_timeout: Option<Duration>,
}

impl Adb {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            pull_timeout: None,
        }
    }

    pub fn with_pull_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Find adb: explicit config, then the SDK environment variables, then PATH
    pub fn locate(config: &Config) -> Result<Self> {
        let pull_timeout = config.pull_timeout();

        if let Some(path) = &config.adb.path {
            return Ok(Self::new(path).with_pull_timeout(pull_timeout));
        }

        let mut searched = Vec::new();
        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Ok(sdk) = std::env::var(var) {
                let candidate = PathBuf::from(sdk).join("platform-tools").join(adb_file_name());
                if candidate.exists() {
                    return Ok(Self::new(candidate).with_pull_timeout(pull_timeout));
                }
                searched.push(candidate.display().to_string());
            }
        }

        match which::which("adb") {
            Ok(path) => Ok(Self::new(path).with_pull_timeout(pull_timeout)),
            Err(_) => {
                searched.push("PATH".to_string());
                Err(Error::AdbNotFound {
                    searched: searched.join(", "),
                })
            }
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn device_command(&self, device: &Device) -> ProcessCommand {
        ProcessCommand::new(&self.binary).args(["-s", device.id()])
    }

    /// List devices in the `device` state
    pub async fn connected_devices(&self) -> Result<Vec<Device>> {
        let command = ProcessCommand::new(&self.binary).arg("devices");
        let (code, lines) = run_collecting(
            &command,
            SpawnOptions::default().with_timeout(LIST_DEVICES_TIMEOUT),
        )
        .await?;

        if code != Some(0) {
            return Err(Error::ProcessFailed {
                command: command.to_string(),
                code,
            });
        }
        Ok(parse_devices(&lines.join("\n")))
    }
}

#[async_trait]
impl DeviceBridge for Adb {
    async fn execute(
        &self,
        device: &Device,
        args: &[String],
        options: SpawnOptions,
    ) -> Result<ProcessHandle> {
        let command = self.device_command(device).args(args.iter().cloned());
        process::spawn(&command, options).await
    }

    async fn pull_folder(&self, device: &Device, device_path: &str, host_path: &Path) -> Result<()> {
        let command = self
            .device_command(device)
            .args(["pull", device_path])
            .arg(host_path.display().to_string());
        let options = SpawnOptions {
            timeout: self.pull_timeout,
            ..Default::default()
        };

        let (code, lines) = run_collecting(&command, options)
            .await
            .map_err(|e| Error::pull_failed(device_path, e))?;

        if code == Some(0) {
            Ok(())
        } else {
            let reason = lines
                .iter()
                .rev()
                .find(|line| !line.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| format!("adb pull exited with code {:?}", code));
            Err(Error::pull_failed(device_path, reason))
        }
    }

    async fn clear_log(&self, device: &Device, timeout: Duration) -> Result<()> {
        let command = self.device_command(device).args(["logcat", "-c"]);
        let handle = process::spawn(&command, SpawnOptions::default().with_timeout(timeout))
            .await
            .map_err(|e| Error::LogClearFailed(e.to_string()))?;
        handle
            .wait_success()
            .await
            .map_err(|e| Error::LogClearFailed(e.to_string()))
    }

    async fn follow_log_to_file(&self, device: &Device, host_file: &Path) -> Result<ProcessHandle> {
        let command = self.device_command(device).arg("logcat");
        process::spawn(&command, SpawnOptions::default().capture_to(host_file)).await
    }
}

/// Run a short command to completion, returning its exit code and output
async fn run_collecting(
    command: &ProcessCommand,
    options: SpawnOptions,
) -> Result<(Option<i32>, Vec<String>)> {
    let mut handle = process::spawn(command, options).await?;
    let mut lines = Vec::new();

    while let Some(notification) = handle.next_notification().await {
        match notification? {
            Notification::Started { mut output, .. } => {
                while let Some(line) = output.next_line().await {
                    lines.push(line);
                }
            }
            Notification::Exited { code } => return Ok((code, lines)),
        }
    }
    Err(Error::NotificationStreamClosed)
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

/// Parse `adb devices` output, keeping only devices ready for use
///
/// ```text
/// List of devices attached
/// emulator-5554	device
/// 192.168.1.1:5555	offline
/// ```
pub fn parse_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(Device::new(serial)),
                _ => None,
            }
        })
        .collect()
}
