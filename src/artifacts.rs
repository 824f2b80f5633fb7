//! Pulling per-test artifacts off the device
//!
//! Tests write screenshots to `<deviceFolder>/<className>/<testName>/`.
//! After each test finishes that folder is pulled to
//! `<outputDir>/screenshots/<safeId>/<className>/<testName>/`.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::paths;
use crate::device::{Device, DeviceBridge};
use crate::instrumentation::TestId;

/// Files pulled for one test, each list sorted by file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PulledFiles {
    pub files: Vec<PathBuf>,
    pub screenshots: Vec<PathBuf>,
}

/// Pull a test's artifact folder. Never fails: a missing folder or a
/// failed pull yields whatever is on disk afterwards, usually nothing.
pub async fn pull_test_files(
    bridge: &dyn DeviceBridge,
    device: &Device,
    test: &TestId,
    output_dir: &Path,
    device_folder: &str,
    verbose: bool,
) -> PulledFiles {
    let host_class_dir = paths::screenshots_class_dir(output_dir, device, &test.class_name);
    if let Err(e) = tokio::fs::create_dir_all(&host_class_dir).await {
        tracing::warn!(
            device = %device,
            "Could not create {}: {}",
            host_class_dir.display(),
            e
        );
        return PulledFiles::default();
    }

    let folder_on_device = device_test_folder(device_folder, test);
    if let Err(e) = bridge
        .pull_folder(device, &folder_on_device, &host_class_dir)
        .await
    {
        if verbose {
            tracing::warn!(device = %device, "{}", e);
        } else {
            tracing::debug!(device = %device, "{}", e);
        }
    }

    let screenshots = match list_sorted(&host_class_dir.join(&test.test_name)).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(device = %device, test = %test, "Could not list pulled files: {}", e);
            Vec::new()
        }
    };

    PulledFiles {
        // Only screenshots are collected so far
        files: Vec::new(),
        screenshots,
    }
}

fn device_test_folder(device_folder: &str, test: &TestId) -> String {
    format!(
        "{}/{}/{}",
        device_folder.trim_end_matches('/'),
        test.class_name,
        test.test_name
    )
}

/// Direct children of `dir` sorted by name; a missing directory is empty
async fn list_sorted(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        files.push(entry.path());
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
