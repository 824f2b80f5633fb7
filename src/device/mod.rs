//! Devices and the bridge used to talk to them
//!
//! The run pipeline only depends on [`DeviceBridge`]; [`Adb`] is the
//! production implementation.

mod adb;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::Result;
use crate::process::{ProcessHandle, SpawnOptions};

pub use adb::{parse_devices, Adb};

/// A connected device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Device {
    id: String,
    path_safe_id: String,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        // Windows does not accept colons in paths (tcp serials look like host:port)
        let path_safe_id = id.replace(':', "_");
        Self { id, path_safe_id }
    }

    /// Serial as reported by adb
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serial usable as a single path component
    pub fn path_safe_id(&self) -> &str {
        &self.path_safe_id
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Device operations the run pipeline needs
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Run a bridge command against the device
    async fn execute(
        &self,
        device: &Device,
        args: &[String],
        options: SpawnOptions,
    ) -> Result<ProcessHandle>;

    /// Copy a device folder into `host_path`; the folder lands as
    /// `host_path/<last component of device_path>`
    async fn pull_folder(&self, device: &Device, device_path: &str, host_path: &Path) -> Result<()>;

    /// Drop everything currently in the device log
    async fn clear_log(&self, device: &Device, timeout: Duration) -> Result<()>;

    /// Start a process appending the device log to `host_file`
    async fn follow_log_to_file(&self, device: &Device, host_file: &Path) -> Result<ProcessHandle>;
}
