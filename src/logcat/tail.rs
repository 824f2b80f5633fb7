//! Incremental reader for a file another process keeps appending to

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

/// Follows a growing file line by line.
///
/// Content is read once; a trailing line without its newline is held back
/// until the newline arrives. When the stop signal flips (or its sender is
/// dropped) the tail drains what is left and then ends.
pub struct Tail {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    partial: Vec<u8>,
    poll: Duration,
    stop: watch::Receiver<bool>,
    stopping: bool,
}

impl Tail {
    pub fn new(path: impl AsRef<Path>, poll: Duration, stop: watch::Receiver<bool>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            partial: Vec::new(),
            poll,
            stop,
            stopping: false,
        }
    }

    /// Next complete line, or `None` once stopped and drained
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if !self.stopping && *self.stop.borrow() {
                self.stopping = true;
            }

            if self.reader.is_none() {
                match File::open(&self.path).await {
                    Ok(file) => self.reader = Some(BufReader::new(file)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        if self.stopping {
                            return Ok(None);
                        }
                        self.wait().await;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            if let Some(reader) = self.reader.as_mut() {
                reader.read_until(b'\n', &mut self.partial).await?;
            }
            if self.partial.ends_with(b"\n") {
                return Ok(Some(self.take_line()));
            }

            // At end of file, possibly holding half a line
            if self.stopping {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }
            self.wait().await;
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.partial);
        let line = String::from_utf8_lossy(&bytes);
        line.trim_end_matches(|c| c == '\n' || c == '\r').to_string()
    }

    async fn wait(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll) => {}
            _ = self.stop.changed() => self.stopping = true,
        }
    }
}
