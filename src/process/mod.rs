//! Process supervision
//!
//! Spawns the long-running and short-lived subprocesses a device run
//! needs, streams their output line by line (optionally tee'd to a file)
//! and guarantees they can be terminated exactly once.

mod guard;
mod supervisor;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use guard::ProcessGuard;
pub use supervisor::{spawn, Notification, OutputLines, ProcessControl, ProcessHandle};

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Options for [`spawn`]
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Kill the process and report `Error::Expired` once this elapses
    pub timeout: Option<Duration>,
    /// Also write every output line to this file
    pub capture_output_to: Option<PathBuf>,
}

impl SpawnOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_output_to = Some(path.into());
        self
    }
}
