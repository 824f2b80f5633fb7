//! Splitting the device log into per-test slices

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::paths;
use crate::instrumentation::{parse_test_boundary, Phase, TestId};

use super::tail::Tail;

/// Log text attributed to one test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLog {
    pub test: TestId,
    pub content: String,
}

/// Rolling attribution state over the device log.
///
/// Lines accumulate until a `finished` marker closes the most recently
/// started test; the accumulated text becomes that test's log. A finish
/// for any other test leaves the buffer growing.
#[derive(Debug, Default)]
pub struct LogDemux {
    buffer: String,
    started: Option<TestId>,
    finished: Option<TestId>,
}

impl LogDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one log line; returns a test log when this line completes one
    pub fn push_line(&mut self, line: &str) -> Option<TestLog> {
        self.buffer.push_str(line);
        self.buffer.push('\n');

        match parse_test_boundary(line) {
            Some(boundary) => match boundary.phase {
                Phase::Started => {
                    self.started = Some(boundary.test);
                    self.finished = None;
                }
                Phase::Finished => self.finished = Some(boundary.test),
            },
            // The finished identity only lives for the line that set it
            None => self.finished = None,
        }

        let closed = matches!(
            (&self.started, &self.finished),
            (Some(started), Some(finished)) if started == finished
        );
        if !closed {
            return None;
        }

        self.finished = None;
        let test = self.started.take()?;
        Some(TestLog {
            test,
            content: std::mem::take(&mut self.buffer),
        })
    }

    /// Test whose log is still accumulating
    pub fn pending(&self) -> Option<&TestId> {
        self.started.as_ref()
    }
}

/// Background demultiplexer following a full log file
pub struct DemuxTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<io::Result<usize>>,
}

impl DemuxTask {
    /// Drain what the file holds now, stop following, and return how many
    /// per-test logs were written. Failures are logged, not returned.
    pub async fn stop(self) -> usize {
        let _ = self.stop_tx.send(true);
        match self.handle.await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                tracing::warn!("Log demultiplexer failed: {}", e);
                0
            }
            Err(e) => {
                tracing::warn!("Log demultiplexer task failed: {}", e);
                0
            }
        }
    }
}

/// Start following `full_log`, writing per-test slices under `logs_dir`.
///
/// Dropping the returned task also stops it once the file is drained.
pub fn spawn_demux(full_log: PathBuf, logs_dir: PathBuf, poll: Duration) -> DemuxTask {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let tail = Tail::new(&full_log, poll, stop_rx);
        run_demux(tail, &logs_dir).await
    });
    DemuxTask { stop_tx, handle }
}

/// Demultiplex a complete log file once. Running it again over the same
/// file rewrites identical per-test logs.
pub async fn demux_file(full_log: &Path, logs_dir: &Path) -> io::Result<usize> {
    let (_stop_tx, stop_rx) = watch::channel(true);
    let tail = Tail::new(full_log, Duration::from_millis(10), stop_rx);
    run_demux(tail, logs_dir).await
}

async fn run_demux(mut tail: Tail, logs_dir: &Path) -> io::Result<usize> {
    let mut demux = LogDemux::new();
    let mut written = 0;

    while let Some(line) = tail.next_line().await? {
        if let Some(log) = demux.push_line(&line) {
            // One unwritable slice must not cost the following tests theirs
            match write_test_log(logs_dir, &log).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(test = %log.test, "Could not write per-test log: {}", e),
            }
        }
    }

    if let Some(test) = demux.pending() {
        tracing::debug!(%test, "No finished marker in the device log, per-test log not written");
    }
    Ok(written)
}

async fn write_test_log(logs_dir: &Path, log: &TestLog) -> io::Result<()> {
    let path = paths::test_logcat_file(logs_dir, &log.test.class_name, &log.test.test_name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &log.content).await?;
    tracing::trace!(path = %path.display(), "Wrote per-test log");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
10-16 12:00:00.000  100  100 I TestRunner: run started: 2 tests
10-16 12:00:00.010  100  100 I TestRunner: started: testA(com.x.ClassA)
10-16 12:00:00.020  200  200 D MyApp: doing A
10-16 12:00:00.030  100  100 I TestRunner: finished: testA(com.x.ClassA)
10-16 12:00:00.040  100  100 I TestRunner: started: testB(com.x.ClassA)
10-16 12:00:00.050  200  200 D MyApp: doing B
10-16 12:00:00.060  100  100 I TestRunner: finished: testB(com.x.ClassA)
10-16 12:00:00.070  100  100 I TestRunner: run finished: 2 tests, 0 failed, 0 ignored
";

    fn push_all(demux: &mut LogDemux, text: &str) -> Vec<TestLog> {
        text.lines().filter_map(|line| demux.push_line(line)).collect()
    }

    #[test]
    fn test_slices_per_test() {
        let mut demux = LogDemux::new();
        let logs = push_all(&mut demux, LOG);

        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].test, TestId::new("com.x.ClassA", "testA"));
        assert!(logs[0].content.starts_with("10-16 12:00:00.000"));
        assert!(logs[0].content.contains("doing A"));
        assert!(logs[0].content.ends_with("finished: testA(com.x.ClassA)\n"));

        assert_eq!(logs[1].test, TestId::new("com.x.ClassA", "testB"));
        assert!(logs[1].content.starts_with("10-16 12:00:00.040"));
        assert!(!logs[1].content.contains("doing A"));
        assert!(demux.pending().is_none());
    }

    #[test]
    fn test_started_marker_alone_does_not_flush() {
        let mut demux = LogDemux::new();
        assert!(demux.push_line("TestRunner: started: testA(com.x.ClassA)").is_none());
        assert_eq!(demux.pending(), Some(&TestId::new("com.x.ClassA", "testA")));
    }

    #[test]
    fn test_finish_for_other_test_keeps_accumulating() {
        let mut demux = LogDemux::new();
        let logs = push_all(
            &mut demux,
            "TestRunner: started: testA(com.x.ClassA)\n\
             TestRunner: finished: testZ(com.x.ClassA)\n\
             app line\n\
             TestRunner: finished: testA(com.x.ClassA)\n",
        );

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].content.lines().count(), 4);
    }

    #[test]
    fn test_crashed_test_never_materializes() {
        let mut demux = LogDemux::new();
        let logs = push_all(
            &mut demux,
            "TestRunner: started: testA(com.x.ClassA)\nFATAL EXCEPTION: main\n",
        );
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let full_log = dir.path().join("full.logcat");
        std::fs::write(&full_log, LOG).unwrap();
        let logs_dir = dir.path().join("logs");

        assert_eq!(demux_file(&full_log, &logs_dir).await.unwrap(), 2);
        let a = paths::test_logcat_file(&logs_dir, "com.x.ClassA", "testA");
        let b = paths::test_logcat_file(&logs_dir, "com.x.ClassA", "testB");
        let first = (std::fs::read_to_string(&a).unwrap(), std::fs::read_to_string(&b).unwrap());

        assert_eq!(demux_file(&full_log, &logs_dir).await.unwrap(), 2);
        let second = (std::fs::read_to_string(&a).unwrap(), std::fs::read_to_string(&b).unwrap());

        assert_eq!(first, second);
        let files: Vec<_> = std::fs::read_dir(logs_dir.join("com.x.ClassA"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_slice_does_not_stop_later_slices() {
        let dir = tempfile::tempdir().unwrap();
        let full_log = dir.path().join("full.logcat");
        let logs_dir = dir.path().join("logs");
        let long_name = "t".repeat(300);
        std::fs::write(
            &full_log,
            format!(
                "TestRunner: started: {name}(com.x.ClassA)\n\
                 TestRunner: finished: {name}(com.x.ClassA)\n\
                 TestRunner: started: testB(com.x.ClassA)\n\
                 doing B\n\
                 TestRunner: finished: testB(com.x.ClassA)\n",
                name = long_name
            ),
        )
        .unwrap();

        assert_eq!(demux_file(&full_log, &logs_dir).await.unwrap(), 1);
        let b = paths::test_logcat_file(&logs_dir, "com.x.ClassA", "testB");
        assert!(std::fs::read_to_string(b).unwrap().contains("doing B"));
    }

    #[tokio::test]
    async fn test_spawned_demux_follows_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let full_log = dir.path().join("full.logcat");
        let logs_dir = dir.path().join("logs");
        std::fs::write(&full_log, "").unwrap();

        let task = spawn_demux(full_log.clone(), logs_dir.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        std::fs::write(&full_log, LOG).unwrap();

        assert_eq!(task.stop().await, 2);
        assert!(paths::test_logcat_file(&logs_dir, "com.x.ClassA", "testB").exists());
    }
}
