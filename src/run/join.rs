//! Completion barrier for a device run

/// Where a run stands relative to its three completion signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Nothing arrived yet
    Running,
    /// Some signals arrived, others are outstanding
    AwaitingJoin,
    /// Tests collected, log capture started and instrumentation exited
    Done,
    /// Some part of the run failed; nothing more is accepted
    Failed,
}

/// Collects the results of the concurrent parts of a run.
///
/// The run completes only once the collected tests, the started log
/// capture and the instrumentation exit code are all present, in any
/// arrival order.
#[derive(Debug)]
pub struct RunJoin<T, L> {
    tests: Option<Vec<T>>,
    log: Option<L>,
    exit: Option<Option<i32>>,
    failed: bool,
}

impl<T, L> Default for RunJoin<T, L> {
    fn default() -> Self {
        Self {
            tests: None,
            log: None,
            exit: None,
            failed: false,
        }
    }
}

impl<T, L> RunJoin<T, L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        if self.failed {
            return RunPhase::Failed;
        }
        match (&self.tests, &self.log, &self.exit) {
            (Some(_), Some(_), Some(_)) => RunPhase::Done,
            (None, None, None) => RunPhase::Running,
            _ => RunPhase::AwaitingJoin,
        }
    }

    pub fn tests_collected(&mut self, tests: Vec<T>) {
        if !self.failed {
            self.tests = Some(tests);
        }
    }

    pub fn log_started(&mut self, log: L) {
        if !self.failed {
            self.log = Some(log);
        }
    }

    pub fn instrumentation_exited(&mut self, code: Option<i32>) {
        if !self.failed {
            self.exit = Some(code);
        }
    }

    pub fn has_tests(&self) -> bool {
        self.tests.is_some()
    }

    pub fn has_log(&self) -> bool {
        self.log.is_some()
    }

    pub fn has_exit(&self) -> bool {
        self.exit.is_some()
    }

    /// Mark the run failed and hand back whatever log capture had started
    pub fn fail(&mut self) -> Option<L> {
        self.failed = true;
        self.tests = None;
        self.exit = None;
        self.log.take()
    }

    /// Take the joined parts once the run is `Done`
    pub fn complete(self) -> Option<(Vec<T>, L, Option<i32>)> {
        if self.failed {
            return None;
        }
        match (self.tests, self.log, self.exit) {
            (Some(tests), Some(log), Some(exit)) => Some((tests, log, exit)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_only_with_all_three_signals() {
        let mut join: RunJoin<u8, &str> = RunJoin::new();
        assert_eq!(join.phase(), RunPhase::Running);

        join.instrumentation_exited(Some(0));
        assert_eq!(join.phase(), RunPhase::AwaitingJoin);
        join.tests_collected(vec![1, 2]);
        assert_eq!(join.phase(), RunPhase::AwaitingJoin);
        join.log_started("log");
        assert_eq!(join.phase(), RunPhase::Done);

        let (tests, log, exit) = join.complete().unwrap();
        assert_eq!(tests, vec![1, 2]);
        assert_eq!(log, "log");
        assert_eq!(exit, Some(0));
    }

    #[test]
    fn test_incomplete_join_yields_nothing() {
        let mut join: RunJoin<u8, &str> = RunJoin::new();
        join.tests_collected(Vec::new());
        join.log_started("log");
        assert!(join.complete().is_none());
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut join: RunJoin<u8, &str> = RunJoin::new();
        join.log_started("log");
        assert_eq!(join.fail(), Some("log"));
        assert_eq!(join.phase(), RunPhase::Failed);

        join.tests_collected(vec![1]);
        join.log_started("again");
        join.instrumentation_exited(Some(0));
        assert_eq!(join.phase(), RunPhase::Failed);
        assert!(join.complete().is_none());
    }
}
