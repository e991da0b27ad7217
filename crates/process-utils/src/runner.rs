//! Abortable process runner.
//!
//! A run is tied to a [`CancellationToken`]. When the token fires, the child receives one
//! graceful termination request (`SIGTERM` on unix) and a force-kill timer is armed. If the
//! child exits before the timer fires the timer is disarmed, otherwise it is killed and the
//! run reports [`RunStatus::Terminated`].
//!
//! Output is delivered either buffered (bounded, returned with the outcome) or streamed as
//! raw chunks to an [`OutputSink`] while the process runs.

use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tokio_command;

/// Delay between the graceful termination request and the forced kill.
pub const DEFAULT_FORCE_KILL_DELAY: Duration = Duration::from_secs(5);

/// Per-stream cap for buffered runs (3 MiB).
pub const DEFAULT_MAX_BUFFER: usize = 3 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Descendants may inherit and hold the pipes after the child itself exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Exited with code 0.
    Completed,
    /// Exited with a non-zero code (or by a signal) without being aborted.
    Failed,
    /// Aborted and exited after the graceful termination request.
    Aborted,
    /// Aborted and force-killed after the delay elapsed.
    Terminated,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// True for both abort outcomes.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted | Self::Terminated)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus the raw exit code, when the OS reported one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub code: Option<i32>,
}

impl RunOutcome {
    fn aborted() -> Self {
        Self {
            status: RunStatus::Aborted,
            code: None,
        }
    }
}

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives raw output chunks in streaming mode.
///
/// Chunks are not line-aligned and may split UTF-8 sequences.
pub trait OutputSink: Send {
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]);
}

impl<F> OutputSink for F
where
    F: FnMut(StreamKind, &[u8]) + Send,
{
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]) {
        self(stream, chunk)
    }
}

/// Result of a buffered run.
#[derive(Debug, Clone)]
pub struct BufferedOutput {
    pub outcome: RunOutcome,
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream exceeded the buffer cap and was cut.
    pub truncated: bool,
}

struct BufferedSink {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BufferedSink {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
            truncated: false,
        }
    }
}

impl OutputSink for BufferedSink {
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]) {
        let buf = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        let room = self.limit.saturating_sub(buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Spawns external executables with cooperative cancellation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    force_kill_delay: Duration,
    max_buffer: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            force_kill_delay: DEFAULT_FORCE_KILL_DELAY,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    pub fn with_force_kill_delay(mut self, delay: Duration) -> Self {
        self.force_kill_delay = delay;
        self
    }

    pub fn with_max_buffer(mut self, bytes: usize) -> Self {
        self.max_buffer = bytes;
        self
    }

    pub fn force_kill_delay(&self) -> Duration {
        self.force_kill_delay
    }

    /// Run to completion, collecting stdout/stderr up to the buffer cap.
    pub async fn run_buffered(
        &self,
        program: impl AsRef<OsStr>,
        args: &[String],
        cancel: &CancellationToken,
    ) -> io::Result<BufferedOutput> {
        let mut sink = BufferedSink::new(self.max_buffer);
        let outcome = self
            .run_inner(program.as_ref(), args, cancel, &mut sink)
            .await?;

        if sink.truncated {
            warn!(
                program = ?program.as_ref(),
                limit = self.max_buffer,
                "Process output exceeded buffer cap and was truncated"
            );
        }

        Ok(BufferedOutput {
            outcome,
            stdout: String::from_utf8_lossy(&sink.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&sink.stderr).into_owned(),
            truncated: sink.truncated,
        })
    }

    /// Run to completion, forwarding every raw chunk to `sink` as it arrives.
    pub async fn run_streaming(
        &self,
        program: impl AsRef<OsStr>,
        args: &[String],
        cancel: &CancellationToken,
        sink: &mut dyn OutputSink,
    ) -> io::Result<RunOutcome> {
        self.run_inner(program.as_ref(), args, cancel, sink).await
    }

    async fn run_inner(
        &self,
        program: &OsStr,
        args: &[String],
        cancel: &CancellationToken,
        sink: &mut dyn OutputSink,
    ) -> io::Result<RunOutcome> {
        if cancel.is_cancelled() {
            debug!(?program, "Run cancelled before spawn");
            return Ok(RunOutcome::aborted());
        }

        let mut cmd = tokio_command(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if cancel.is_cancelled() => {
                debug!(?program, error = %e, "Spawn failed after abort");
                return Ok(RunOutcome::aborted());
            }
            Err(e) => return Err(e),
        };

        let pid = child.id();
        debug!(?program, pid, args = ?args, "Process spawned");

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut stdout_buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stderr_buf = vec![0u8; READ_CHUNK_SIZE];

        let force_kill = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(force_kill);
        let drain_deadline = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(drain_deadline);

        let mut graceful_sent = false;
        let mut kill_armed = false;
        let mut force_killed = false;
        let mut cancelled_at_exit = false;
        let mut exit: Option<ExitStatus> = None;

        while exit.is_none() || stdout.is_some() || stderr.is_some() {
            tokio::select! {
                _ = cancel.cancelled(), if !graceful_sent && exit.is_none() => {
                    graceful_sent = true;
                    request_termination(&mut child);
                    force_kill.as_mut().reset(Instant::now() + self.force_kill_delay);
                    kill_armed = true;
                }
                _ = &mut force_kill, if kill_armed => {
                    kill_armed = false;
                    force_killed = true;
                    warn!(?program, pid, "Process ignored termination request, killing");
                    if let Err(e) = child.start_kill() {
                        debug!(pid, error = %e, "Force kill failed");
                    }
                }
                status = child.wait(), if exit.is_none() => {
                    match status {
                        Ok(status) => exit = Some(status),
                        Err(e) if cancel.is_cancelled() => {
                            debug!(pid, error = %e, "Wait failed after abort");
                            return Ok(RunOutcome::aborted());
                        }
                        Err(e) => return Err(e),
                    }
                    cancelled_at_exit = cancel.is_cancelled();
                    kill_armed = false;
                    drain_deadline.as_mut().reset(Instant::now() + PIPE_DRAIN_GRACE);
                }
                read = read_chunk(&mut stdout, &mut stdout_buf), if stdout.is_some() => {
                    match read {
                        Ok(0) | Err(_) => stdout = None,
                        Ok(n) => sink.on_chunk(StreamKind::Stdout, &stdout_buf[..n]),
                    }
                }
                read = read_chunk(&mut stderr, &mut stderr_buf), if stderr.is_some() => {
                    match read {
                        Ok(0) | Err(_) => stderr = None,
                        Ok(n) => sink.on_chunk(StreamKind::Stderr, &stderr_buf[..n]),
                    }
                }
                _ = &mut drain_deadline, if exit.is_some() => {
                    debug!(pid, "Output pipes still open after exit, stop draining");
                    break;
                }
            }
        }

        let exit = exit.ok_or_else(|| io::Error::other("process exit status unavailable"))?;
        let code = exit.code();
        let status = if cancelled_at_exit {
            if force_killed {
                RunStatus::Terminated
            } else {
                RunStatus::Aborted
            }
        } else if exit.success() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        debug!(?program, pid, %status, code, "Process finished");
        Ok(RunOutcome { status, code })
    }
}

/// Send the graceful termination request once.
fn request_termination(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => debug!(pid, "Sent SIGTERM"),
                Err(e) => debug!(pid, error = %e, "SIGTERM failed"),
            }
            return;
        }
    }

    // No graceful signal on this platform, or the child is already reaped.
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Termination request failed");
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
