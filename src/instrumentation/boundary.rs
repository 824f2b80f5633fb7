//! Test-runner marker lines
//!
//! The device test runner logs one line per test lifecycle step, e.g.
//! `TestRunner: started: testA(com.x.ClassA)`. The same lines show up in
//! `am instrument` output and in the device log, so both consumers share
//! these functions.

use super::TestId;

const RUNNER_MARKER: &str = "TestRunner";

/// Which edge of a test a marker line reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestBoundary {
    pub phase: Phase,
    pub test: TestId,
}

/// Parse a `started`/`finished` marker line. Every other line yields `None`.
pub fn parse_test_boundary(line: &str) -> Option<TestBoundary> {
    let (status, rest) = split_runner_marker(line)?;
    let phase = match status {
        "started" => Phase::Started,
        "finished" => Phase::Finished,
        _ => return None,
    };
    Some(TestBoundary {
        phase,
        test: parse_display_name(rest)?,
    })
}

/// Split `…TestRunner: <status>: <rest>` into trimmed `(status, rest)`.
///
/// Requires exactly three `:`-separated tokens starting at the marker.
pub(crate) fn split_runner_marker(line: &str) -> Option<(&str, &str)> {
    let index = line.find(RUNNER_MARKER)?;
    let mut tokens = line[index..].split(':');
    let (_marker, status, rest) = (tokens.next()?, tokens.next()?, tokens.next()?);
    if tokens.next().is_some() {
        return None;
    }
    Some((status.trim(), rest.trim()))
}

/// Text following `TestRunner:` on a line, used for exception blocks
pub(crate) fn runner_payload(line: &str) -> Option<&str> {
    let index = line.find(RUNNER_MARKER)?;
    let rest = &line[index + RUNNER_MARKER.len()..];
    // Skips `:` or a logcat `( 1234):` tag suffix
    let rest = match rest.find(':') {
        Some(colon) => &rest[colon + 1..],
        None => rest,
    };
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Parse a JUnit display name `testName(com.x.ClassName)`
pub(crate) fn parse_display_name(token: &str) -> Option<TestId> {
    let token = token.trim();
    let open = token.find('(')?;
    let test_name = token[..open].trim();
    let class_name = token[open + 1..].strip_suffix(')').unwrap_or(&token[open + 1..]);

    if test_name.is_empty() || class_name.is_empty() {
        return None;
    }
    Some(TestId::new(class_name, test_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_marker() {
        let boundary = parse_test_boundary("TestRunner: started: testA(com.x.ClassA)").unwrap();
        assert_eq!(boundary.phase, Phase::Started);
        assert_eq!(boundary.test, TestId::new("com.x.ClassA", "testA"));
    }

    #[test]
    fn test_finished_marker_inside_logcat_line() {
        let line = "10-16 12:00:01.123  4242  4260 I TestRunner: finished: testA(com.x.ClassA)";
        let boundary = parse_test_boundary(line).unwrap();
        assert_eq!(boundary.phase, Phase::Finished);
        assert_eq!(boundary.test, TestId::new("com.x.ClassA", "testA"));
    }

    #[test]
    fn test_other_statuses_are_not_boundaries() {
        assert!(parse_test_boundary("TestRunner: failed: testA(com.x.ClassA)").is_none());
        assert!(parse_test_boundary("TestRunner: run started: 3 tests").is_none());
        assert!(parse_test_boundary("TestRunner: ignored: testB(com.x.ClassA)").is_none());
    }

    #[test]
    fn test_wrong_token_count_is_ignored() {
        assert!(parse_test_boundary("TestRunner: started").is_none());
        assert!(parse_test_boundary("TestRunner: started: testA(com.x.ClassA): extra").is_none());
        assert!(parse_test_boundary("ActivityManager: started: testA(com.x.ClassA)").is_none());
        assert!(parse_test_boundary("").is_none());
    }

    #[test]
    fn test_status_is_trimmed() {
        let boundary = parse_test_boundary("TestRunner:   finished  : testA(com.x.ClassA)  ").unwrap();
        assert_eq!(boundary.phase, Phase::Finished);
        assert_eq!(boundary.test.test_name, "testA");
    }

    #[test]
    fn test_display_name_without_parens_is_rejected() {
        assert!(parse_test_boundary("TestRunner: started: testA").is_none());
        assert!(parse_test_boundary("TestRunner: started: (com.x.ClassA)").is_none());
    }

    #[test]
    fn test_runner_payload() {
        assert_eq!(
            runner_payload("E TestRunner: java.lang.AssertionError: boom"),
            Some("java.lang.AssertionError: boom")
        );
        assert_eq!(
            runner_payload("I/TestRunner( 1234): ----- begin exception -----"),
            Some("----- begin exception -----")
        );
        assert_eq!(runner_payload("unrelated"), None);
    }
}
