//! # Process Utilities
//!
//! Waiting on and killing spawned OS processes. Every task process runs as the
//! leader of its own process group, so killing the group takes down any children
//! the script started.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::EXIT_CODE_FAILURE;
use crate::error::{WorkerError, WorkerResult};

/// How a wait on a spawned process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    TimedOut,
    Cancelled,
}

/// Map an exit status to the reported exit code; signal deaths become `128 + signal`
pub fn exit_code_of(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => status
            .signal()
            .map(|signal| 128 + signal)
            .unwrap_or(EXIT_CODE_FAILURE),
    }
}

/// Wait for `child` to exit within `budget`, or until `cancel` fires
///
/// The child is not killed here; callers decide what a timeout or cancellation means.
pub async fn wait_with_timeout(
    child: &mut Child,
    budget: Option<Duration>,
    cancel: &CancellationToken,
) -> WorkerResult<ProcessExit> {
    let deadline = async {
        match budget {
            Some(budget) => tokio::time::sleep(budget).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        status = child.wait() => Ok(ProcessExit::Exited(exit_code_of(status?))),
        _ = deadline => Ok(ProcessExit::TimedOut),
        _ = cancel.cancelled() => Ok(ProcessExit::Cancelled),
    }
}

/// Kill the process group led by `pid`, falling back to the pid itself
pub async fn kill_process_tree(pid: u32) -> WorkerResult<()> {
    if pid == 0 {
        return Ok(());
    }

    if send_kill(&["-9", "--", &format!("-{pid}")]).await? {
        debug!(pid = pid, "Killed process group");
        return Ok(());
    }
    if send_kill(&["-9", &pid.to_string()]).await? {
        debug!(pid = pid, "Killed process");
        return Ok(());
    }
    if !is_process_alive(pid).await {
        // Already gone.
        return Ok(());
    }
    Err(WorkerError::process(format!("failed to kill process {pid}")))
}

/// Kill the tree and reap the child so it does not linger as a zombie
pub async fn kill_and_reap(child: &mut Child, pid: u32) {
    if let Err(error) = kill_process_tree(pid).await {
        warn!(pid = pid, error = %error, "Kill process tree failed, killing child directly");
        if let Err(error) = child.start_kill() {
            warn!(pid = pid, error = %error, "Kill child failed");
        }
    }
    if tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_err()
    {
        warn!(pid = pid, "Child did not exit after kill");
    }
}

/// Whether a process with `pid` exists
pub async fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    send_kill(&["-0", &pid.to_string()]).await.unwrap_or(false)
}

async fn send_kill(args: &[&str]) -> WorkerResult<bool> {
    let status = Command::new("kill")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| WorkerError::process(format!("failed to run kill {}: {e}", args.join(" "))))?;
    Ok(status.success())
}
