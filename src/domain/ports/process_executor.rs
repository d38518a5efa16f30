//! ProcessExecutor port
//! Interface for launching and terminating system processes

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::domain::Result;

/// Everything a launch needs, assembled by the controller
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub file_name: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Run-as user; on unix the launcher hands workdir ownership over first
    pub user_name: Option<String>,
    /// When true, stdout/stderr are piped and the stderr tail is captured
    /// into the exit report; when false the child keeps the console binding
    pub capture_output: bool,
}

/// What a reaped child left behind
#[derive(Debug, Clone, PartialEq)]
pub struct ExitReport {
    /// None when the process was killed by a signal
    pub code: Option<i32>,
    /// Captured stderr tail, present only when capture was requested
    pub stderr_tail: Option<String>,
}

impl ExitReport {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Completion side of an [`ExitWatch`]; held by the adapter's reaper task
/// (or completed by hand in tests)
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<Option<ExitReport>>,
}

impl ExitNotifier {
    pub fn complete(&self, report: ExitReport) {
        self.tx.send_replace(Some(report));
    }
}

/// Shared cell that resolves once the child has been reaped.
///
/// The controller polls it on every check and waits on it (with a deadline)
/// during the early-exit window after a start.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitReport>>,
}

impl ExitWatch {
    /// A watch that has not resolved yet, plus its completion handle
    pub fn pending() -> (ExitNotifier, ExitWatch) {
        let (tx, rx) = watch::channel(None);
        (ExitNotifier { tx }, ExitWatch { rx })
    }

    /// A watch that resolved before anyone looked at it
    pub fn completed(report: ExitReport) -> ExitWatch {
        let (tx, rx) = watch::channel(Some(report));
        drop(tx);
        ExitWatch { rx }
    }

    /// Non-blocking probe
    pub fn exited(&self) -> Option<ExitReport> {
        self.rx.borrow().clone()
    }

    /// Wait up to `timeout` for the child to be reaped. A zero timeout
    /// degenerates to a probe.
    pub async fn wait(&self, timeout: Duration) -> Option<ExitReport> {
        if timeout.is_zero() {
            return self.exited();
        }
        let mut rx = self.rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                let current: Option<ExitReport> = rx.borrow_and_update().clone();
                if let Some(report) = current {
                    return report;
                }
                if rx.changed().await.is_err() {
                    // Notifier dropped without a report; the child outlived
                    // its reaper, so pend until the deadline fires.
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .ok()
    }
}

/// Result of a spawn: the pid plus the shared exit cell
#[derive(Debug, Clone)]
pub struct SpawnResult {
    pub pid: u32,
    pub exit: ExitWatch,
}

/// Port for launching and terminating system processes
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Spawn a child process
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult>;

    /// Politely ask the process to close (SIGINT / window close)
    async fn graceful_close(&self, pid: u32) -> Result<()>;

    /// Platform graceful kill (`SIGTERM` on unix, `taskkill -pid` on Windows)
    async fn terminate(&self, pid: u32) -> Result<()>;

    /// Unconditional kill (`SIGKILL` / `taskkill -f`)
    async fn force_kill(&self, pid: u32) -> Result<()>;

    /// Liveness probe by pid
    async fn is_running(&self, pid: u32) -> Result<bool>;
}
