//! Scoped ownership of a background process

use super::ProcessControl;

/// Owns the obligation to terminate a background process.
///
/// `release` terminates it on the success path; dropping an unreleased
/// guard terminates it on every other path. Either way the process sees
/// at most one termination request.
#[derive(Debug)]
pub struct ProcessGuard {
    label: &'static str,
    control: Option<ProcessControl>,
}

impl ProcessGuard {
    pub fn new(label: &'static str, control: ProcessControl) -> Self {
        Self {
            label,
            control: Some(control),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.as_ref().map(ProcessControl::pid)
    }

    /// Terminate the process now. Returns whether a request was delivered.
    pub fn release(mut self) -> bool {
        match self.control.take() {
            Some(control) => {
                tracing::info!("Stopping {} process - PID {}", self.label, control.pid());
                control.terminate()
            }
            None => false,
        }
    }

    /// Give up the obligation without signalling, for a process known to
    /// have exited already
    pub fn disarm(mut self) {
        self.control = None;
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(control) = self.control.take() {
            if control.terminate() {
                tracing::warn!("Killed {} process with PID {}", self.label, control.pid());
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{spawn, ProcessCommand, SpawnOptions};

    async fn sleeper() -> crate::process::ProcessHandle {
        spawn(
            &ProcessCommand::new("sh").args(["-c", "sleep 30"]),
            SpawnOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_drop_terminates_once() {
        let handle = sleeper().await;
        let control = handle.control();

        drop(ProcessGuard::new("sleeper", handle.control()));
        assert_eq!(control.signals_sent(), 1);

        handle.wait_exit().await.unwrap();
        assert_eq!(control.signals_sent(), 1);
    }

    #[tokio::test]
    async fn test_release_then_nothing_on_drop() {
        let handle = sleeper().await;
        let control = handle.control();

        let guard = ProcessGuard::new("sleeper", handle.control());
        assert!(guard.release());
        assert!(!control.terminate());
        assert_eq!(control.signals_sent(), 1);
    }

    #[tokio::test]
    async fn test_disarm_never_signals() {
        let handle = spawn(
            &ProcessCommand::new("sh").args(["-c", "true"]),
            SpawnOptions::default(),
        )
        .await
        .unwrap();
        let control = handle.control();

        let guard = ProcessGuard::new("short", handle.control());
        handle.wait_exit().await.unwrap();
        guard.disarm();
        assert_eq!(control.signals_sent(), 0);
    }
}
