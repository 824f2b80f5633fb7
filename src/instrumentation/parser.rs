//! Line-fed parser for instrumentation output
//!
//! Understands two formats the device runner emits:
//!
//! - `am instrument -r` status blocks:
//!   ```text
//!   INSTRUMENTATION_STATUS: class=com.x.ClassA
//!   INSTRUMENTATION_STATUS: current=1
//!   INSTRUMENTATION_STATUS: numtests=2
//!   INSTRUMENTATION_STATUS: test=testA
//!   INSTRUMENTATION_STATUS_CODE: 1
//!   ```
//!   Codes: 1 start, 0 ok, -1/-2 failure, -3 ignored, -4 assumption failure.
//!   Values may continue over several lines (`stack=`, `stream=`).
//!
//! - runner marker lines (`TestRunner: started: testA(com.x.ClassA)`),
//!   with `failed:`, `ignored:`, `assumption failed:` and
//!   `----- begin exception -----` blocks carrying the outcome.

use std::collections::HashMap;
use std::time::Instant;

use super::boundary::{parse_display_name, parse_test_boundary, runner_payload, split_runner_marker};
use super::{InstrumentationEvent, Phase, TestId, TestOutcome};

const STATUS_PREFIX: &str = "INSTRUMENTATION_STATUS: ";
const STATUS_CODE_PREFIX: &str = "INSTRUMENTATION_STATUS_CODE: ";
const RESULT_PREFIX: &str = "INSTRUMENTATION_RESULT: ";
const CODE_PREFIX: &str = "INSTRUMENTATION_CODE: ";
const BEGIN_EXCEPTION: &str = "----- begin exception -----";
const END_EXCEPTION: &str = "----- end exception -----";

const CODE_START: i32 = 1;
const CODE_OK: i32 = 0;
const CODE_ERROR: i32 = -1;
const CODE_FAILURE: i32 = -2;
const CODE_IGNORED: i32 = -3;
const CODE_ASSUMPTION_FAILURE: i32 = -4;

#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenTest {
    test: TestId,
    index: usize,
    total: usize,
    started_at: Instant,
    outcome: Option<TestOutcome>,
}

/// Incremental parser; feed it output lines in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentationParser {
    /// Tests started so far
    started: usize,
    /// Suite size, 0 until the runner reports it
    total: usize,
    open: Option<OpenTest>,
    /// Values of the status block being read
    status: HashMap<String, String>,
    /// Key whose value continuation lines extend
    status_key: Option<String>,
    /// Lines of an exception block being read
    exception: Option<Vec<String>>,
}

impl InstrumentationParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Vec<InstrumentationEvent> {
        self.feed_at(line, Instant::now())
    }

    /// Feed one line observed at `now`
    pub fn feed_at(&mut self, line: &str, now: Instant) -> Vec<InstrumentationEvent> {
        let line = line.trim_end_matches('\r');

        if let Some(code) = line.strip_prefix(STATUS_CODE_PREFIX) {
            return self.finish_status_block(code.trim(), now);
        }
        if let Some(pair) = line.strip_prefix(STATUS_PREFIX) {
            self.add_status_value(pair);
            return Vec::new();
        }
        if line.starts_with(RESULT_PREFIX) || line.starts_with(CODE_PREFIX) {
            self.status.clear();
            self.status_key = None;
            return Vec::new();
        }
        if let Some(key) = &self.status_key {
            if let Some(value) = self.status.get_mut(key) {
                value.push('\n');
                value.push_str(line);
            }
            return Vec::new();
        }

        self.feed_marker(line, now)
    }

    /// The test that started but has not finished, if any
    pub fn unfinished(&self) -> Option<&TestId> {
        self.open.as_ref().map(|open| &open.test)
    }

    fn add_status_value(&mut self, pair: &str) {
        if let Some((key, value)) = pair.split_once('=') {
            self.status.insert(key.to_string(), value.to_string());
            self.status_key = Some(key.to_string());
        }
    }

    fn finish_status_block(&mut self, code: &str, now: Instant) -> Vec<InstrumentationEvent> {
        let block = std::mem::take(&mut self.status);
        self.status_key = None;

        let code: i32 = match code.parse() {
            Ok(code) => code,
            Err(_) => return Vec::new(),
        };
        let test = match (block.get("class"), block.get("test")) {
            (Some(class), Some(test)) => TestId::new(class.trim(), test.trim()),
            _ => return Vec::new(),
        };
        if let Some(total) = block.get("numtests").and_then(|v| v.trim().parse().ok()) {
            self.total = total;
        }
        let stacktrace = block
            .get("stack")
            .map(|stack| stack.trim_end().to_string())
            .unwrap_or_default();

        match code {
            CODE_START => {
                let index = block.get("current").and_then(|v| v.trim().parse().ok());
                self.start(test, index, now).into_iter().collect()
            }
            CODE_OK => self.finish(&test, Some(TestOutcome::Passed), now),
            CODE_ERROR | CODE_FAILURE => {
                self.finish(&test, Some(TestOutcome::Failed { stacktrace }), now)
            }
            CODE_IGNORED | CODE_ASSUMPTION_FAILURE => {
                self.finish(&test, Some(TestOutcome::Ignored { stacktrace }), now)
            }
            _ => Vec::new(),
        }
    }

    fn feed_marker(&mut self, line: &str, now: Instant) -> Vec<InstrumentationEvent> {
        // A block cut short by a crash ends at the next test boundary
        if self.exception.is_some() && parse_test_boundary(line).is_some() {
            if let Some(lines) = self.exception.take() {
                self.attach_stacktrace(lines.join("\n"));
            }
        }

        if let Some(lines) = self.exception.as_mut() {
            if let Some(payload) = runner_payload(line) {
                if payload.trim() == END_EXCEPTION {
                    let trace = lines.join("\n");
                    self.exception = None;
                    self.attach_stacktrace(trace);
                } else {
                    lines.push(payload.to_string());
                }
            }
            return Vec::new();
        }

        if let Some(boundary) = parse_test_boundary(line) {
            return match boundary.phase {
                Phase::Started => self.start(boundary.test, None, now).into_iter().collect(),
                Phase::Finished => self.finish(&boundary.test, None, now),
            };
        }

        let (status, rest) = match split_runner_marker(line) {
            Some(marker) => marker,
            None => {
                if runner_payload(line).map(str::trim) == Some(BEGIN_EXCEPTION) {
                    self.exception = Some(Vec::new());
                }
                return Vec::new();
            }
        };

        match status {
            "run started" => {
                if let Some(total) = rest.split_whitespace().next().and_then(|n| n.parse().ok()) {
                    self.total = total;
                }
                Vec::new()
            }
            "failed" => {
                self.record_outcome(rest, TestOutcome::Failed { stacktrace: String::new() });
                Vec::new()
            }
            "assumption failed" => {
                self.record_outcome(rest, TestOutcome::Ignored { stacktrace: String::new() });
                Vec::new()
            }
            "ignored" => self.ignored(rest, now),
            _ => Vec::new(),
        }
    }

    fn start(&mut self, test: TestId, index: Option<usize>, now: Instant) -> Option<InstrumentationEvent> {
        if let Some(open) = &self.open {
            if open.test == test {
                return None;
            }
            tracing::debug!(test = %open.test, "Test started again before finishing, dropping it");
        }

        self.started += 1;
        let index = index.unwrap_or(self.started);
        let total = self.total;
        self.open = Some(OpenTest {
            test: test.clone(),
            index,
            total,
            started_at: now,
            outcome: None,
        });
        Some(InstrumentationEvent::Started { index, total, test })
    }

    /// Close the open test if it is `test`; a finish for any other test is
    /// dropped so every Finished follows its Started.
    fn finish(
        &mut self,
        test: &TestId,
        outcome: Option<TestOutcome>,
        now: Instant,
    ) -> Vec<InstrumentationEvent> {
        let open = match self.open.take() {
            Some(open) if open.test == *test => open,
            other => {
                self.open = other;
                return Vec::new();
            }
        };

        vec![InstrumentationEvent::Finished {
            index: open.index,
            total: open.total.max(self.total),
            outcome: outcome.or(open.outcome).unwrap_or(TestOutcome::Passed),
            duration: now.saturating_duration_since(open.started_at),
            test: open.test,
        }]
    }

    fn record_outcome(&mut self, display_name: &str, outcome: TestOutcome) {
        let test = match parse_display_name(display_name) {
            Some(test) => test,
            None => return,
        };
        if let Some(open) = self.open.as_mut().filter(|open| open.test == test) {
            open.outcome = Some(outcome);
        }
    }

    /// `ignored:` arrives without `started:` for skipped tests
    fn ignored(&mut self, display_name: &str, now: Instant) -> Vec<InstrumentationEvent> {
        let test = match parse_display_name(display_name) {
            Some(test) => test,
            None => return Vec::new(),
        };
        let outcome = TestOutcome::Ignored {
            stacktrace: String::new(),
        };

        if self.open.as_ref().map(|open| open.test == test).unwrap_or(false) {
            self.record_outcome(display_name, outcome);
            return Vec::new();
        }

        let mut events: Vec<_> = self.start(test.clone(), None, now).into_iter().collect();
        events.extend(self.finish(&test, Some(outcome), now));
        events
    }

    fn attach_stacktrace(&mut self, trace: String) {
        let outcome = self.open.as_mut().and_then(|open| open.outcome.as_mut());
        match outcome {
            Some(TestOutcome::Failed { stacktrace }) | Some(TestOutcome::Ignored { stacktrace }) => {
                *stacktrace = trace;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn feed_all(parser: &mut InstrumentationParser, output: &str) -> Vec<InstrumentationEvent> {
        output.lines().flat_map(|line| parser.feed(line)).collect()
    }

    fn finished(events: &[InstrumentationEvent]) -> Vec<(TestId, TestOutcome)> {
        events
            .iter()
            .filter_map(|event| match event {
                InstrumentationEvent::Finished { test, outcome, .. } => {
                    Some((test.clone(), outcome.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_marker_lines_produce_passed_test() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(
            &mut parser,
            "TestRunner: started: testA(com.x.ClassA)\nTestRunner: finished: testA(com.x.ClassA)\n",
        );

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            InstrumentationEvent::Started { index: 1, test, .. } if *test == TestId::new("com.x.ClassA", "testA")
        ));
        assert_eq!(
            finished(&events),
            vec![(TestId::new("com.x.ClassA", "testA"), TestOutcome::Passed)]
        );
    }

    #[test]
    fn test_marker_failure_with_exception_block() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(
            &mut parser,
            "I TestRunner: run started: 2 tests\n\
             I TestRunner: started: testA(com.x.ClassA)\n\
             E TestRunner: failed: testA(com.x.ClassA)\n\
             E TestRunner: ----- begin exception -----\n\
             E TestRunner: java.lang.AssertionError: boom\n\
             E TestRunner: \tat com.x.ClassA.testA(ClassA.kt:12)\n\
             E TestRunner: ----- end exception -----\n\
             I TestRunner: finished: testA(com.x.ClassA)\n",
        );

        assert!(matches!(events[0], InstrumentationEvent::Started { index: 1, total: 2, .. }));
        assert_eq!(
            finished(&events),
            vec![(
                TestId::new("com.x.ClassA", "testA"),
                TestOutcome::Failed {
                    stacktrace: "java.lang.AssertionError: boom\n\tat com.x.ClassA.testA(ClassA.kt:12)"
                        .to_string()
                }
            )]
        );
    }

    #[test]
    fn test_unterminated_exception_block_ends_at_next_boundary() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(
            &mut parser,
            "TestRunner: started: testA(com.x.ClassA)\n\
             TestRunner: failed: testA(com.x.ClassA)\n\
             TestRunner: ----- begin exception -----\n\
             TestRunner: java.lang.IllegalStateException: crashed\n\
             TestRunner: finished: testA(com.x.ClassA)\n\
             TestRunner: started: testB(com.x.ClassA)\n\
             TestRunner: finished: testB(com.x.ClassA)\n",
        );

        assert_eq!(events.len(), 4);
        assert_eq!(
            finished(&events),
            vec![
                (
                    TestId::new("com.x.ClassA", "testA"),
                    TestOutcome::Failed {
                        stacktrace: "java.lang.IllegalStateException: crashed".to_string()
                    }
                ),
                (TestId::new("com.x.ClassA", "testB"), TestOutcome::Passed),
            ]
        );
        assert!(parser.unfinished().is_none());
    }

    #[test]
    fn test_ignored_marker_without_start() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(&mut parser, "TestRunner: ignored: testB(com.x.ClassA)\n");

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InstrumentationEvent::Started { .. }));
        assert_eq!(
            finished(&events),
            vec![(
                TestId::new("com.x.ClassA", "testB"),
                TestOutcome::Ignored {
                    stacktrace: String::new()
                }
            )]
        );
    }

    #[test]
    fn test_status_blocks() {
        let output = "\
INSTRUMENTATION_STATUS: class=com.x.ClassA
INSTRUMENTATION_STATUS: current=1
INSTRUMENTATION_STATUS: id=AndroidJUnitRunner
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: stream=
com.x.ClassA:
INSTRUMENTATION_STATUS: test=testA
INSTRUMENTATION_STATUS_CODE: 1
INSTRUMENTATION_STATUS: class=com.x.ClassA
INSTRUMENTATION_STATUS: current=1
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: stack=java.lang.AssertionError: boom
\tat com.x.ClassA.testA(ClassA.kt:12)

INSTRUMENTATION_STATUS: test=testA
INSTRUMENTATION_STATUS_CODE: -2
INSTRUMENTATION_STATUS: class=com.x.ClassA
INSTRUMENTATION_STATUS: current=2
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: test=testB
INSTRUMENTATION_STATUS_CODE: 1
INSTRUMENTATION_STATUS: class=com.x.ClassA
INSTRUMENTATION_STATUS: current=2
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: test=testB
INSTRUMENTATION_STATUS_CODE: 0
INSTRUMENTATION_STATUS: class=com.x.ClassB
INSTRUMENTATION_STATUS: current=3
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: test=testC
INSTRUMENTATION_STATUS_CODE: 1
INSTRUMENTATION_STATUS: class=com.x.ClassB
INSTRUMENTATION_STATUS: current=3
INSTRUMENTATION_STATUS: numtests=3
INSTRUMENTATION_STATUS: test=testC
INSTRUMENTATION_STATUS_CODE: -3
INSTRUMENTATION_RESULT: stream=

Time: 1.234

OK (3 tests)
INSTRUMENTATION_CODE: -1
";
        let mut parser = InstrumentationParser::new();
        let events = feed_all(&mut parser, output);

        assert_eq!(events.len(), 6);
        assert!(matches!(
            events[2],
            InstrumentationEvent::Started { index: 2, total: 3, .. }
        ));
        assert_eq!(
            finished(&events),
            vec![
                (
                    TestId::new("com.x.ClassA", "testA"),
                    TestOutcome::Failed {
                        stacktrace: "java.lang.AssertionError: boom\n\tat com.x.ClassA.testA(ClassA.kt:12)"
                            .to_string()
                    }
                ),
                (TestId::new("com.x.ClassA", "testB"), TestOutcome::Passed),
                (
                    TestId::new("com.x.ClassB", "testC"),
                    TestOutcome::Ignored {
                        stacktrace: String::new()
                    }
                ),
            ]
        );
        assert!(parser.unfinished().is_none());
    }

    #[test]
    fn test_finish_without_start_is_dropped() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(
            &mut parser,
            "TestRunner: started: testA(com.x.ClassA)\n\
             TestRunner: finished: testB(com.x.ClassA)\n\
             TestRunner: finished: testA(com.x.ClassA)\n\
             TestRunner: finished: testA(com.x.ClassA)\n",
        );

        let tests: Vec<_> = finished(&events).into_iter().map(|(test, _)| test).collect();
        assert_eq!(tests, vec![TestId::new("com.x.ClassA", "testA")]);
    }

    #[test]
    fn test_every_finish_follows_its_start() {
        let mut parser = InstrumentationParser::new();
        let events = feed_all(
            &mut parser,
            "TestRunner: finished: orphan(com.x.ClassA)\n\
             TestRunner: started: testA(com.x.ClassA)\n\
             TestRunner: started: testA(com.x.ClassA)\n\
             TestRunner: started: testB(com.x.ClassA)\n\
             TestRunner: finished: testA(com.x.ClassA)\n\
             TestRunner: finished: testB(com.x.ClassA)\n",
        );

        let mut started = Vec::new();
        for event in &events {
            match event {
                InstrumentationEvent::Started { test, .. } => started.push(test.clone()),
                InstrumentationEvent::Finished { test, .. } => {
                    assert_eq!(started.last(), Some(test));
                }
            }
        }
        assert_eq!(finished(&events).len(), 1);
    }

    #[test]
    fn test_unrelated_lines_do_not_change_state() {
        let mut parser = InstrumentationParser::new();
        parser.feed("TestRunner: started: testA(com.x.ClassA)");
        let before = parser.clone();

        for noise in [
            "",
            "random application log line",
            "TestRunner: started",
            "TestRunner: weird: testA(com.x.ClassA)",
            "TestRunner: a: b: c: d",
            "INSTRUMENTATION_STATUS_CODE: not-a-number",
        ] {
            assert!(parser.feed(noise).is_empty(), "line produced events: {:?}", noise);
        }
        assert_eq!(parser, before);
    }

    #[test]
    fn test_duration_measured_from_start() {
        let mut parser = InstrumentationParser::new();
        let t0 = Instant::now();
        parser.feed_at("TestRunner: started: testA(com.x.ClassA)", t0);
        let events = parser.feed_at(
            "TestRunner: finished: testA(com.x.ClassA)",
            t0 + Duration::from_millis(1500),
        );

        match &events[0] {
            InstrumentationEvent::Finished { duration, .. } => {
                assert_eq!(*duration, Duration::from_millis(1500))
            }
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn test_unfinished_test_is_reported() {
        let mut parser = InstrumentationParser::new();
        parser.feed("TestRunner: started: testA(com.x.ClassA)");
        assert_eq!(parser.unfinished(), Some(&TestId::new("com.x.ClassA", "testA")));
    }
}
