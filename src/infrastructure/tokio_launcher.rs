//! Tokio process launcher
//! Real implementation of the ProcessExecutor port
//!
//! Cross-platform behavior:
//! - unix: native signals via libc (SIGINT / SIGTERM / SIGKILL), run-as user
//!   with a recursive workdir ownership hand-off
//! - Windows: `taskkill` for termination, `tasklist` for liveness

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::constants::launcher::{BASE_PATH_ENV, STDERR_TAIL_LIMIT};
use crate::domain::ports::{ExitReport, ExitWatch, ProcessExecutor, SpawnConfig, SpawnResult};
use crate::domain::{DomainError, Result};

/// Process launcher backed by `tokio::process`.
///
/// Without capture the child inherits the supervisor's stdio and shares its
/// console, so it dies with the supervisor; with capture the pipes are
/// drained by a background reaper that keeps the stderr tail for diagnosis.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessLauncher {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult> {
        let work_dir = absolutize(&config.work_dir);
        info!(
            command = %config.file_name,
            args = ?config.args,
            work_dir = %work_dir.display(),
            "spawning process"
        );

        if config.file_name.is_empty() {
            return Err(DomainError::Spawn("empty command".to_string()));
        }

        #[cfg(unix)]
        if let Some(user) = &config.user_name {
            hand_over_ownership(user, &work_dir).await;
        }

        let mut cmd = Command::new(&config.file_name);
        cmd.args(&config.args)
            .current_dir(&work_dir)
            .env(BASE_PATH_ENV, &work_dir);

        #[cfg(unix)]
        if let Some(user) = &config.user_name {
            match resolve_uid(user) {
                Some(uid) => {
                    debug!(user = %user, uid = uid, "resolved run-as user");
                    cmd.uid(uid);
                }
                None => warn!(user = %user, "run-as user not found, launching as self"),
            }
        }

        if config.capture_output {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = cmd.spawn().map_err(|e| {
            DomainError::Spawn(format!("{}: {}", config.file_name, e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| DomainError::Spawn("child exited before its pid was read".into()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (notifier, exit) = ExitWatch::pending();

        tokio::spawn(async move {
            if let Some(mut out) = stdout {
                // Keep the stdout pipe from backing up.
                tokio::spawn(async move {
                    let mut sink = tokio::io::sink();
                    let _ = tokio::io::copy(&mut out, &mut sink).await;
                });
            }
            let tail = match stderr {
                Some(err) => read_tail(err).await,
                None => None,
            };
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid = pid, error = %e, "failed to reap child");
                    None
                }
            };
            debug!(pid = pid, code = ?code, "child reaped");
            notifier.complete(ExitReport {
                code,
                stderr_tail: tail,
            });
        });

        info!(pid = pid, "process spawned");
        Ok(SpawnResult { pid, exit })
    }

    async fn graceful_close(&self, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            send_signal(pid, libc::SIGINT)
        }
        #[cfg(windows)]
        {
            taskkill(pid, false).await
        }
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            send_signal(pid, libc::SIGTERM)
        }
        #[cfg(windows)]
        {
            taskkill(pid, false).await
        }
    }

    async fn force_kill(&self, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            send_signal(pid, libc::SIGKILL)
        }
        #[cfg(windows)]
        {
            taskkill(pid, true).await
        }
    }

    async fn is_running(&self, pid: u32) -> Result<bool> {
        #[cfg(unix)]
        {
            let rc = unsafe { libc::kill(pid as i32, 0) };
            Ok(rc == 0)
        }
        #[cfg(windows)]
        {
            let output = Command::new("tasklist")
                .arg("/FI")
                .arg(format!("PID eq {}", pid))
                .arg("/NH")
                .output()
                .await
                .map_err(|e| DomainError::Io(e.to_string()))?;
            Ok(String::from_utf8_lossy(&output.stdout).contains(&pid.to_string()))
        }
    }
}

/// Drain stderr to EOF, keeping only the trailing bytes for the exit report
async fn read_tail(mut err: tokio::process::ChildStderr) -> Option<String> {
    use tokio::io::AsyncReadExt;

    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match err.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL_LIMIT {
                    let cut = tail.len() - STDERR_TAIL_LIMIT;
                    tail.drain(..cut);
                }
            }
        }
    }
    if tail.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as i32, signal) };
    if rc != 0 {
        return Err(DomainError::Terminate {
            pid,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn resolve_uid(user: &str) -> Option<u32> {
    use std::ffi::CString;

    let user_cstr = CString::new(user).ok()?;
    unsafe {
        let pwd = libc::getpwnam(user_cstr.as_ptr());
        if pwd.is_null() {
            None
        } else {
            Some((*pwd).pw_uid)
        }
    }
}

/// Transfer workdir (and parent) ownership before launching as another user.
/// Runs out of process; failure is logged, never fatal.
#[cfg(unix)]
async fn hand_over_ownership(user: &str, work_dir: &Path) {
    let spec = format!("{}:{}", user, user);
    let mut targets = vec![work_dir.to_path_buf()];
    if let Some(parent) = work_dir.parent() {
        if !parent.as_os_str().is_empty() {
            targets.push(parent.to_path_buf());
        }
    }
    for dir in targets {
        match Command::new("chown")
            .arg("-R")
            .arg(&spec)
            .arg(&dir)
            .status()
            .await
        {
            Ok(status) if status.success() => {
                debug!(dir = %dir.display(), user = %user, "workdir ownership transferred");
            }
            Ok(status) => {
                warn!(dir = %dir.display(), user = %user, status = ?status.code(), "chown failed");
            }
            Err(e) => {
                warn!(dir = %dir.display(), user = %user, error = %e, "chown could not run");
            }
        }
    }
}

#[cfg(windows)]
async fn taskkill(pid: u32, force: bool) -> Result<()> {
    let mut cmd = Command::new("taskkill");
    cmd.arg("-pid").arg(pid.to_string());
    if force {
        cmd.arg("-f");
    }
    let status = cmd
        .status()
        .await
        .map_err(|e| DomainError::Terminate {
            pid,
            reason: e.to_string(),
        })?;
    if !status.success() {
        return Err(DomainError::Terminate {
            pid,
            reason: format!("taskkill exited with {:?}", status.code()),
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shell(script: &str, capture: bool) -> SpawnConfig {
        SpawnConfig {
            file_name: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            work_dir: std::env::temp_dir(),
            user_name: None,
            capture_output: capture,
        }
    }

    #[tokio::test]
    async fn test_spawn_reports_exit_code() {
        let launcher = TokioProcessLauncher::new();
        let spawned = launcher.spawn(shell("exit 7", false)).await.unwrap();
        let report = spawned.exit.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.code, Some(7));
    }

    #[tokio::test]
    async fn test_capture_keeps_stderr_tail() {
        let launcher = TokioProcessLauncher::new();
        let spawned = launcher
            .spawn(shell("echo boom >&2; exit 3", true))
            .await
            .unwrap();
        let report = spawned.exit.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.code, Some(3));
        assert!(report.stderr_tail.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_base_path_env_is_set() {
        let launcher = TokioProcessLauncher::new();
        let spawned = launcher
            .spawn(shell("test -n \"$BasePath\" || exit 9", false))
            .await
            .unwrap();
        let report = spawned.exit.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.code, Some(0));
    }

    #[tokio::test]
    async fn test_terminate_kills_long_runner() {
        let launcher = TokioProcessLauncher::new();
        let spawned = launcher.spawn(shell("sleep 30", false)).await.unwrap();
        assert!(launcher.is_running(spawned.pid).await.unwrap());

        launcher.terminate(spawned.pid).await.unwrap();
        let report = spawned.exit.wait(Duration::from_secs(5)).await;
        assert!(report.is_some());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_spawn_error() {
        let launcher = TokioProcessLauncher::new();
        let err = launcher
            .spawn(SpawnConfig {
                file_name: "/definitely/not/a/binary".to_string(),
                args: vec![],
                work_dir: std::env::temp_dir(),
                user_name: None,
                capture_output: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Spawn(_)));
    }
}
