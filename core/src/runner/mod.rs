//! External process execution with a bounded wait.
//!
//! [`ProcessRunner`] spawns one process per call, captures stdout/stderr and
//! guarantees the process (and, on Unix, its whole process group) is gone
//! before returning from a timeout or cancellation. Failures are returned as
//! [`RunOutcome`] values, never as panics or errors crossing task boundaries.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
pub(crate) mod scripted;

/// How long to wait for a killed process to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of running one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own. Exit by signal reports `-1`.
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The timeout elapsed; the process has been terminated.
    TimedOut,
    /// The cancellation token fired; the process has been terminated.
    Cancelled,
    /// The process could not be started or its output could not be read.
    SpawnFailed { reason: String },
}

/// Runs external commands.
///
/// `argv[0]` is the executable. Implementations must return within
/// `timeout` (plus cleanup) and must honour `cancel`.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        argv: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RunOutcome;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

enum Waited {
    Exited(io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let Some((program, args)) = argv.split_first() else {
            return RunOutcome::SpawnFailed {
                reason: "empty argument list".to_string(),
            };
        };
        if timeout.is_zero() {
            return RunOutcome::TimedOut;
        }
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take descendants down too.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, "Failed to spawn command: {e}");
                return RunOutcome::SpawnFailed {
                    reason: format!("{program}: {e}"),
                };
            }
        };
        let pid = child.id();
        debug!(pid, command = %argv.join(" "), "Spawned command");

        let deadline = Instant::now() + timeout;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let waited = {
            let collect =
                tokio::time::timeout_at(deadline, collect_output(&mut child, stdout, stderr));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Waited::Cancelled,
                result = collect => match result {
                    Ok(output) => Waited::Exited(output),
                    Err(_) => Waited::TimedOut,
                },
            }
        };

        match waited {
            Waited::Exited(Ok((status, stdout, stderr))) => {
                let exit_code = status.code().unwrap_or(-1);
                debug!(pid, exit_code, "Command exited");
                RunOutcome::Completed {
                    exit_code,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                }
            }
            Waited::Exited(Err(e)) => {
                warn!(pid, "Failed to collect command output: {e}");
                terminate(&mut child, pid).await;
                RunOutcome::SpawnFailed {
                    reason: format!("failed to collect output: {e}"),
                }
            }
            Waited::TimedOut => {
                warn!(
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out, killing"
                );
                terminate(&mut child, pid).await;
                RunOutcome::TimedOut
            }
            Waited::Cancelled => {
                debug!(pid, "Command cancelled, killing");
                terminate(&mut child, pid).await;
                RunOutcome::Cancelled
            }
        }
    }
}

async fn collect_output(
    child: &mut Child,
    stdout: Option<impl AsyncRead + Unpin>,
    stderr: Option<impl AsyncRead + Unpin>,
) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let (status, stdout, stderr) =
        tokio::join!(child.wait(), read_stream(stdout), read_stream(stderr));
    Ok((status?, stdout?, stderr?))
}

async fn read_stream(stream: Option<impl AsyncRead + Unpin>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the process group (Unix) and the child, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, "killpg failed: {e}");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        debug!("start_kill failed (process likely exited): {e}");
    }
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "Killed command reaped"),
        Ok(Err(e)) => warn!("Failed to reap killed command: {e}"),
        Err(_) => warn!("Killed command not reaped within {:?}", REAP_TIMEOUT),
    }
}
