//! Child-process supervision: spawn, stream, time out, cancel, escalate.
//!
//! One child at a time. Output is read in byte chunks from both pipes
//! concurrently and handed to the sink as complete lines, so partial writes
//! (progress dots, carriage-return spinners) never stall the reader.
//! Termination escalates: soft signal, grace period, hard kill. In detached
//! mode the child is a session leader and the whole group is signalled, so
//! executor-tool descendants are reaped with it.

use orc_core::OutputSource;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(3);

const READ_BUF_SIZE: usize = 4096;

/// How the child is attached to the daemon's process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Child runs in the daemon's process group. Used for cmd steps.
    Foreground,
    /// Child becomes a group leader so descendants can be killed together.
    /// Used for executor-tool steps.
    DetachedGroup,
}

/// Receives line-grouped output while the child runs.
pub trait OutputSink: Send + Sync {
    fn line(&self, source: OutputSource, text: &str);
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn line(&self, _source: OutputSource, _text: &str) {}
}

/// Launch parameters for one supervised child.
#[derive(Debug)]
pub struct SpawnSpec<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub mode: LaunchMode,
    pub timeout: Duration,
    pub grace: Duration,
}

/// Resolution of a supervised child.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub exit_code: i32,
    pub cancelled: bool,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl ChildOutcome {
    fn spawn_failure(message: String) -> Self {
        Self {
            exit_code: -1,
            cancelled: false,
            timed_out: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(message),
        }
    }

    pub fn completed_ok(&self) -> bool {
        self.exit_code == 0 && !self.cancelled && !self.timed_out
    }
}

/// Accumulates byte chunks and flushes complete lines.
struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: String::new() }
    }

    fn push_chunk(&mut self, chunk: &str, mut flush: impl FnMut(&str)) {
        self.buf.push_str(chunk);
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            flush(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn finish(self, mut flush: impl FnMut(&str)) {
        if !self.buf.is_empty() {
            flush(self.buf.trim_end_matches('\r'));
        }
    }
}

/// Supervise one child process to completion.
///
/// The returned outcome always reflects a fully reaped child (or a spawn
/// failure); the timeout and grace timers are dead by the time this returns.
pub async fn supervise(
    spec: SpawnSpec<'_>,
    sink: &dyn OutputSink,
    cancel: &CancellationToken,
) -> ChildOutcome {
    let Some((program, args)) = spec.argv.split_first() else {
        return ChildOutcome::spawn_failure("empty command".to_string());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(spec.cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    if spec.mode == LaunchMode::DetachedGroup {
        // SAFETY: setsid is async-signal-safe and runs before exec.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let message = if e.kind() == std::io::ErrorKind::NotFound {
                format!("executable not found: {program}")
            } else {
                e.to_string()
            };
            return ChildOutcome::spawn_failure(message);
        }
    };

    debug!(program = %program, pid = child.id(), mode = ?spec.mode, "spawned child");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_reader = stdout.map(BufReader::new);
    let mut stderr_reader = stderr.map(BufReader::new);

    let mut stdout_capture = String::new();
    let mut stderr_capture = String::new();
    let mut stdout_lines = LineBuffer::new();
    let mut stderr_lines = LineBuffer::new();

    let deadline = Instant::now() + spec.timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let mut terminating = false;
    let mut hard_killed = false;
    let mut grace_deadline: Option<Instant> = None;

    let mut stdout_done = stdout_reader.is_none();
    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    while !stdout_done || !stderr_done {
        tokio::select! {
            result = read_some(stdout_reader.as_mut(), &mut stdout_buf), if !stdout_done => {
                match result {
                    Some(n) if n > 0 => {
                        let chunk = String::from_utf8_lossy(&stdout_buf[..n]);
                        stdout_capture.push_str(&chunk);
                        stdout_lines.push_chunk(&chunk, |line| sink.line(OutputSource::Stdout, line));
                    }
                    _ => {
                        std::mem::replace(&mut stdout_lines, LineBuffer::new())
                            .finish(|line| sink.line(OutputSource::Stdout, line));
                        stdout_done = true;
                    }
                }
            }
            result = read_some(stderr_reader.as_mut(), &mut stderr_buf), if !stderr_done => {
                match result {
                    Some(n) if n > 0 => {
                        let chunk = String::from_utf8_lossy(&stderr_buf[..n]);
                        stderr_capture.push_str(&chunk);
                        stderr_lines.push_chunk(&chunk, |line| sink.line(OutputSource::Stderr, line));
                    }
                    _ => {
                        std::mem::replace(&mut stderr_lines, LineBuffer::new())
                            .finish(|line| sink.line(OutputSource::Stderr, line));
                        stderr_done = true;
                    }
                }
            }
            () = tokio::time::sleep_until(deadline), if !terminating => {
                timed_out = true;
                warn!(timeout_secs = spec.timeout.as_secs(), "child exceeded run timeout");
                sink.line(OutputSource::System, "[Timeout exceeded]");
                soft_terminate(&mut child, spec.mode);
                terminating = true;
                grace_deadline = Some(Instant::now() + spec.grace);
            }
            () = cancel.cancelled(), if !terminating => {
                cancelled = true;
                soft_terminate(&mut child, spec.mode);
                terminating = true;
                grace_deadline = Some(Instant::now() + spec.grace);
            }
            () = sleep_opt(grace_deadline), if terminating && !hard_killed => {
                hard_kill(&mut child, spec.mode);
                hard_killed = true;
            }
        }
    }

    // Streams are drained; reap the child, still honoring the timers in case
    // it closed its stdio but refuses to exit.
    let status = loop {
        let poll_deadline = if hard_killed {
            None
        } else if terminating {
            grace_deadline
        } else {
            Some(deadline)
        };
        match wait_child(&mut child, cancel, poll_deadline, !terminating).await {
            WaitResult::Exited(status) => break status,
            WaitResult::Cancelled => {
                cancelled = true;
                soft_terminate(&mut child, spec.mode);
                terminating = true;
                grace_deadline = Some(Instant::now() + spec.grace);
            }
            WaitResult::Elapsed => {
                if terminating {
                    hard_kill(&mut child, spec.mode);
                    hard_killed = true;
                } else {
                    timed_out = true;
                    sink.line(OutputSource::System, "[Timeout exceeded]");
                    soft_terminate(&mut child, spec.mode);
                    terminating = true;
                    grace_deadline = Some(Instant::now() + spec.grace);
                }
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!(error = %e, "failed to reap child");
            -1
        }
    };

    ChildOutcome {
        exit_code,
        cancelled,
        timed_out,
        stdout: stdout_capture,
        stderr: stderr_capture,
        error: None,
    }
}

async fn read_some<R: tokio::io::AsyncRead + Unpin>(
    reader: Option<&mut BufReader<R>>,
    buf: &mut [u8],
) -> Option<usize> {
    match reader {
        Some(r) => r.read(buf).await.ok(),
        None => None,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

enum WaitResult {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    Elapsed,
}

/// Wait for the child, optionally racing cancellation, bounded by a deadline.
///
/// The wait future is dropped on elapse or cancellation, releasing the child
/// borrow so the caller can signal it.
async fn wait_child(
    child: &mut Child,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    watch_cancel: bool,
) -> WaitResult {
    let wait = async {
        if watch_cancel {
            tokio::select! {
                status = child.wait() => WaitResult::Exited(status),
                () = cancel.cancelled() => WaitResult::Cancelled,
            }
        } else {
            WaitResult::Exited(child.wait().await)
        }
    };
    match deadline {
        Some(d) => tokio::time::timeout_at(d, wait)
            .await
            .unwrap_or(WaitResult::Elapsed),
        None => wait.await,
    }
}

#[cfg(unix)]
fn signal_child(child: &mut Child, mode: LaunchMode, signal: i32) {
    if let Some(pid) = child.id() {
        let target = match mode {
            // Negative pid signals the whole process group.
            LaunchMode::DetachedGroup => -(pid as i32),
            LaunchMode::Foreground => pid as i32,
        };
        // SAFETY: kill(2) is async-signal-safe; pid came from a live child.
        unsafe {
            libc::kill(target, signal);
        }
    }
}

#[cfg(unix)]
fn soft_terminate(child: &mut Child, mode: LaunchMode) {
    signal_child(child, mode, libc::SIGTERM);
}

#[cfg(unix)]
fn hard_kill(child: &mut Child, mode: LaunchMode) {
    signal_child(child, mode, libc::SIGKILL);
}

// Without process groups there is no group-wide termination; descendants of
// the executor tool may outlive it here.
#[cfg(not(unix))]
fn soft_terminate(child: &mut Child, _mode: LaunchMode) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn hard_kill(child: &mut Child, _mode: LaunchMode) {
    let _ = child.start_kill();
}
