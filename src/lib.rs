//! instrumentor - Android instrumentation test runner
//!
//! Runs an instrumentation suite on a device while capturing the device
//! log, splits that log per test, pulls each test's screenshots and
//! aggregates everything into a serializable run result.

pub mod artifacts;
pub mod cli;
pub mod commands;
pub mod common;
pub mod device;
pub mod instrumentation;
pub mod logcat;
pub mod process;
pub mod run;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use device::{Device, DeviceBridge};
pub use run::{run_devices, run_tests, RunConfig, RunResult, TestResult};
