//! Child-process supervision: spawn a shell command, optionally capture its
//! streams, enforce the runtime deadline, and distinguish shutdown-cancel
//! from timeout-kill.

use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::catalog::Job;
use crate::clock::Clock;
use crate::recorder::ExecutionEvent;

/// Platform shell wrapper; the free-form command string is handed to it
/// verbatim.
#[cfg(unix)]
const SHELL: (&str, &str) = ("/bin/sh", "-c");
#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd.exe", "/C");

enum Termination {
    Exited(std::process::ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    ShutDown,
}

/// Run one command to completion and return its event.
///
/// Exactly one event is produced per call; the child is reaped on every
/// path, including timeout and shutdown kills. Permits are the caller's
/// concern and stay held until the event has been recorded.
pub async fn run_command<C: Clock>(
    job: &Job,
    clock: &C,
    mut shutdown: watch::Receiver<bool>,
    stderr_means_failure: bool,
) -> ExecutionEvent {
    let start_utc = clock.now_utc();
    if !job.quiet_start {
        tracing::info!(command_id = %job.id, command = %job.command, "starting command");
    }

    let mut cmd = Command::new(SHELL.0);
    cmd.arg(SHELL.1)
        .arg(&job.command)
        .stdin(Stdio::null())
        // If this task is dropped mid-flight the runtime reaps the child.
        .kill_on_drop(true);
    if job.capture_output {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        // Discarded at the OS level; an uncaptured chatty child exerts no
        // pipe pressure on the host.
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }
    // Own process group so the runtime limit can kill the whole tree.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(command_id = %job.id, error = %e, "failed to spawn command");
            return finish(
                job,
                start_utc,
                clock.now_utc(),
                None,
                false,
                Some(format!("spawn failed: {e}")),
            );
        }
    };

    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    let termination = {
        let deadline = async {
            match job.max_runtime {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            // Shutdown wins a race against the deadline.
            biased;
            _ = wait_for_shutdown(&mut shutdown) => Termination::ShutDown,
            status = child.wait() => match status {
                Ok(status) => Termination::Exited(status),
                Err(e) => Termination::WaitFailed(e),
            },
            _ = deadline => Termination::TimedOut,
        }
    };

    if matches!(termination, Termination::TimedOut | Termination::ShutDown) {
        kill_tree(&mut child).await;
    }

    let stdout = read_drained(stdout_reader).await;
    let stderr = read_drained(stderr_reader).await;
    if !stdout.is_empty() {
        tracing::info!(command_id = %job.id, output = %stdout, "command stdout");
    }
    if !stderr.is_empty() {
        tracing::error!(command_id = %job.id, output = %stderr, "command stderr");
    }

    let end_utc = clock.now_utc();
    match termination {
        Termination::Exited(status) => {
            let exit_code = status.code();
            let stderr_failed =
                job.capture_output && stderr_means_failure && !stderr.is_empty();
            let success = status.success() && !stderr_failed;
            let error = match (status.success(), stderr_failed) {
                (true, true) => Some("stderr output present".to_string()),
                _ => None,
            };
            if !success {
                tracing::warn!(
                    command_id = %job.id,
                    exit_code = ?exit_code,
                    cause = error.as_deref().unwrap_or("non-zero exit"),
                    "command failed"
                );
            }
            finish(job, start_utc, end_utc, exit_code, success, error)
        }
        Termination::TimedOut => {
            tracing::warn!(
                command_id = %job.id,
                max_runtime_secs = job.max_runtime.map(|d| d.as_secs()).unwrap_or(0),
                "command exceeded its runtime limit, process tree killed"
            );
            finish(job, start_utc, end_utc, None, false, Some("timeout".to_string()))
        }
        Termination::ShutDown => {
            tracing::info!(command_id = %job.id, "command cancelled by shutdown");
            finish(job, start_utc, end_utc, None, true, None)
        }
        Termination::WaitFailed(e) => {
            tracing::error!(command_id = %job.id, error = %e, "failed waiting for command");
            finish(
                job,
                start_utc,
                end_utc,
                None,
                false,
                Some(format!("wait failed: {e}")),
            )
        }
    }
}

fn finish(
    job: &Job,
    start_utc: chrono::DateTime<chrono::Utc>,
    end_utc: chrono::DateTime<chrono::Utc>,
    exit_code: Option<i32>,
    success: bool,
    error: Option<String>,
) -> ExecutionEvent {
    ExecutionEvent {
        command_id: job.id.clone(),
        command: job.command.clone(),
        start_utc,
        end_utc,
        exit_code,
        success,
        skipped_due_to_conflict: false,
        error,
        duration_ms: 0,
    }
}

fn drain<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        buf
    })
}

async fn read_drained(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => String::from_utf8_lossy(&handle.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// Kill the child's whole process group and reap it.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        // Negative pid addresses the process group created at spawn, so
        // grandchildren go down with the shell.
        let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Resolves once the shutdown flag flips to true; pends forever otherwise.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
    // Sender gone without ever signalling: treat as "never".
    std::future::pending::<()>().await
}
