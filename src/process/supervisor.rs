//! Subprocess spawning, output tee and termination

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::{ProcessCommand, SpawnOptions};

/// Time a terminated process gets to exit before it is killed outright
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Time allowed for output readers to drain after the process exits.
/// A forked helper (e.g. the adb server) can inherit the pipes and keep
/// them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle notification for a spawned process
#[derive(Debug)]
pub enum Notification {
    /// The process is running; `output` yields stdout and stderr lines
    Started { pid: u32, output: OutputLines },
    /// The process exited on its own or after termination
    Exited { code: Option<i32> },
}

/// Line stream of a process's combined stdout and stderr
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<String>,
}

impl OutputLines {
    /// Next output line, `None` once the process closed its output
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Cloneable termination handle for a spawned process
#[derive(Debug, Clone)]
pub struct ProcessControl {
    inner: Arc<ControlInner>,
}

#[derive(Debug)]
struct ControlInner {
    pid: u32,
    command: String,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    signals: AtomicUsize,
}

impl ProcessControl {
    fn new(pid: u32, command: String, kill_tx: oneshot::Sender<()>) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                pid,
                command,
                kill_tx: Mutex::new(Some(kill_tx)),
                signals: AtomicUsize::new(0),
            }),
        }
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn command(&self) -> &str {
        &self.inner.command
    }

    /// Ask the process to terminate.
    ///
    /// Returns `true` if a termination request was delivered. Later calls,
    /// and calls after the process already exited, are no-ops returning
    /// `false`.
    pub fn terminate(&self) -> bool {
        let sender = match self.inner.kill_tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender.map(|tx| tx.send(()).is_ok()) {
            Some(true) => {
                self.inner.signals.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(pid = self.inner.pid, command = %self.inner.command, "Termination requested");
                true
            }
            _ => false,
        }
    }

    /// Number of termination requests actually delivered (0 or 1)
    pub fn signals_sent(&self) -> usize {
        self.inner.signals.load(Ordering::SeqCst)
    }
}

/// Handle to a spawned process
///
/// Dropping the handle (and every [`ProcessControl`] clone) without the
/// process having exited terminates it.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    command: String,
    notifications: mpsc::UnboundedReceiver<Result<Notification>>,
    control: ProcessControl,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    /// Next lifecycle notification
    ///
    /// Yields `Started` first, then either `Exited` or an `Expired` error.
    pub async fn next_notification(&mut self) -> Option<Result<Notification>> {
        self.notifications.recv().await
    }

    /// Wait for the process to exit, discarding its output
    pub async fn wait_exit(mut self) -> Result<Option<i32>> {
        while let Some(notification) = self.next_notification().await {
            match notification? {
                Notification::Started { .. } => {}
                Notification::Exited { code } => return Ok(code),
            }
        }
        Err(Error::NotificationStreamClosed)
    }

    /// Wait for the process to exit and require a zero exit code
    pub async fn wait_success(self) -> Result<()> {
        let command = self.command.clone();
        match self.wait_exit().await? {
            Some(0) => Ok(()),
            code => Err(Error::ProcessFailed { command, code }),
        }
    }
}

/// Spawn a subprocess
///
/// Fails immediately with `Error::Launch` when the executable cannot be
/// started. Output is streamed through the `Started` notification and,
/// when configured, written to `capture_output_to` as it arrives.
pub async fn spawn(command: &ProcessCommand, options: SpawnOptions) -> Result<ProcessHandle> {
    let command_line = command.to_string();

    let capture = match &options.capture_output_to {
        Some(path) => Some(create_capture_file(path).await?),
        None => None,
    };

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::launch(&command_line, e))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Internal(format!("No pid for freshly spawned '{}'", command_line)))?;
    let stdout = child.stdout.take().ok_or(Error::OutputStreamMissing)?;
    let stderr = child.stderr.take().ok_or(Error::OutputStreamMissing)?;

    tracing::debug!(pid, command = %command_line, "Spawned process");

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let readers = vec![
        forward_lines(stdout, raw_tx.clone()),
        forward_lines(stderr, raw_tx),
    ];

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let tee = tokio::spawn(tee_output(raw_rx, capture, line_tx));

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let _ = notify_tx.send(Ok(Notification::Started {
        pid,
        output: OutputLines { rx: line_rx },
    }));

    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(supervise(Supervised {
        child,
        pid,
        command: command_line.clone(),
        timeout: options.timeout,
        kill_rx,
        readers,
        tee,
        notify_tx,
    }));

    Ok(ProcessHandle {
        pid,
        command: command_line.clone(),
        notifications: notify_rx,
        control: ProcessControl::new(pid, command_line, kill_tx),
    })
}

async fn create_capture_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(BufWriter::new(File::create(path).await?))
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Output read failed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn tee_output(
    mut raw_rx: mpsc::UnboundedReceiver<String>,
    mut capture: Option<BufWriter<File>>,
    line_tx: mpsc::UnboundedSender<String>,
) {
    while let Some(line) = raw_rx.recv().await {
        if let Some(file) = capture.as_mut() {
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                tracing::warn!("Stopped writing captured output: {}", e);
                capture = None;
            }
        }
        // The consumer may have stopped listening; the capture file still
        // receives everything.
        let _ = line_tx.send(line);
    }

    if let Some(mut file) = capture {
        let _ = file.flush().await;
    }
}

struct Supervised {
    child: Child,
    pid: u32,
    command: String,
    timeout: Option<Duration>,
    kill_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    tee: JoinHandle<()>,
    notify_tx: mpsc::UnboundedSender<Result<Notification>>,
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    Terminate,
    Expired(Duration),
}

async fn supervise(mut s: Supervised) {
    let ending = tokio::select! {
        status = s.child.wait() => Ending::Exited(status),
        // Fires on an explicit request and when every control was dropped.
        _ = s.kill_rx => Ending::Terminate,
        expired = expire_after(s.timeout) => Ending::Expired(expired),
    };

    let notification = match ending {
        Ending::Exited(Ok(status)) => Ok(Notification::Exited {
            code: status.code(),
        }),
        Ending::Exited(Err(e)) => Err(Error::Io(e)),
        Ending::Terminate => {
            let code = terminate_child(&mut s.child, s.pid, &s.command).await;
            Ok(Notification::Exited { code })
        }
        Ending::Expired(timeout) => {
            tracing::warn!(pid = s.pid, command = %s.command, "Process timed out, killing it");
            if let Err(e) = s.child.kill().await {
                tracing::warn!(pid = s.pid, "Failed to kill expired process: {}", e);
            }
            Err(Error::expired(&s.command, timeout))
        }
    };

    drain_output(s.readers, s.tee).await;

    if let Ok(Notification::Exited { code }) = &notification {
        tracing::debug!(pid = s.pid, command = %s.command, ?code, "Process exited");
    }
    let _ = s.notify_tx.send(notification);
}

async fn expire_after(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            timeout
        }
        None => std::future::pending().await,
    }
}

/// SIGTERM first, SIGKILL if the process ignores it. Failures are logged
/// and swallowed.
async fn terminate_child(child: &mut Child, pid: u32, command: &str) -> Option<i32> {
    #[cfg(unix)]
    {
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            if let Ok(Ok(status)) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                return status.code();
            }
            tracing::debug!(pid, command, "Process ignored SIGTERM, killing it");
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(pid, command, "Failed to kill process: {}", e);
    }
    match child.try_wait() {
        Ok(Some(status)) => status.code(),
        _ => None,
    }
}

async fn drain_output(readers: Vec<JoinHandle<()>>, mut tee: JoinHandle<()>) {
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut tee).await.is_err() {
        tracing::debug!("Output still open after exit, detaching readers");
        for reader in &readers {
            reader.abort();
        }
        let _ = tee.await;
    }
}
