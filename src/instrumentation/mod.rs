//! Instrumentation output parsing
//!
//! Turns the line output of `am instrument -w -r` into test lifecycle
//! events. Lines that are not understood are skipped; parsing never fails.

mod boundary;
mod parser;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use boundary::{parse_test_boundary, Phase, TestBoundary};
pub use parser::InstrumentationParser;

/// Identity of a single test method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TestId {
    pub class_name: String,
    pub test_name: String,
}

impl TestId {
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.test_name)
    }
}

/// Outcome the runner reported for a finished test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Ignored { stacktrace: String },
    Failed { stacktrace: String },
}

impl TestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Ignored { .. } => "ignored",
            TestOutcome::Failed { .. } => "failed",
        }
    }
}

/// Test lifecycle event, in output order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationEvent {
    Started {
        index: usize,
        total: usize,
        test: TestId,
    },
    Finished {
        index: usize,
        total: usize,
        test: TestId,
        outcome: TestOutcome,
        duration: Duration,
    },
}
