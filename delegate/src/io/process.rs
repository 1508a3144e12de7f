//! Helpers for running child processes with timeouts, cancellation and
//! bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::cancel::CancelToken;

/// How often a running child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output readers may keep draining after the child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True when the child exited on its own with status 0.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.cancelled && self.status.success()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// On unix the child leads its own process group, and timeouts or cancellation kill the whole
/// group so shell pipelines do not leave orphans behind.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: Option<&CancelToken>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    // Stdin is fed from its own thread so a child that stops reading cannot
    // block the timeout loop.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let now = Instant::now();
        if cancel.is_some_and(CancelToken::is_cancelled) {
            warn!("command cancelled, killing");
            cancelled = true;
            break kill_and_reap(&mut child)?;
        }
        if now >= deadline {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            break kill_and_reap(&mut child)?;
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    // Background processes of the group may still hold the pipes open after
    // the leader exited.
    if !timed_out && !cancelled {
        kill_process_group(&child);
    }

    let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
    let stdout_drained = stdout_reader.wait_until(drain_until);
    let stderr_drained = stderr_reader.wait_until(drain_until);
    if !(stdout_drained && stderr_drained) {
        warn!("output pipes still open past the deadline, abandoning readers");
        timed_out = true;
    }
    if let Some(handle) = stdin_handle {
        if wait_for_thread(&handle, drain_until) {
            match handle.join() {
                Ok(Ok(())) => {}
                // A child that exits without reading its input closes the pipe early.
                Ok(Err(e)) => warn!(err = %e, "child did not consume stdin"),
                Err(_) => return Err(anyhow!("stdin writer thread panicked")),
            }
        } else {
            warn!("stdin pipe still open, abandoning writer");
        }
    }

    let (stdout, stdout_truncated) = stdout_reader.finish().context("read stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish().context("read stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

fn kill_and_reap(child: &mut Child) -> Result<ExitStatus> {
    kill_process_group(child);
    if let Err(e) = child.kill() {
        debug!(err = %e, "child already exited");
    }
    child.wait().context("wait command after kill")
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(%errno, "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Drains one pipe on its own thread into a shared, size-capped buffer.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    handle: thread::JoinHandle<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&captured);
        let handle = thread::spawn(move || read_stream_limited(reader, limit, &sink));
        Self { captured, handle }
    }

    /// Wait for EOF until `until`. Returns false if the pipe is still open.
    fn wait_until(&self, until: Instant) -> bool {
        wait_for_thread(&self.handle, until)
    }

    /// Output captured so far. A reader still blocked on an open pipe is
    /// detached and keeps nothing beyond this point.
    fn finish(self) -> Result<(Vec<u8>, usize)> {
        if self.handle.is_finished() {
            match self.handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(anyhow!("output reader thread panicked")),
            }
        }
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        let truncated = captured.truncated;
        Ok((std::mem::take(&mut captured.bytes), truncated))
    }
}

/// Poll `handle` until it finishes or `until` passes.
fn wait_for_thread<T>(handle: &thread::JoinHandle<T>, until: Instant) -> bool {
    while !handle.is_finished() {
        let now = Instant::now();
        if now >= until {
            return false;
        }
        thread::sleep(POLL_INTERVAL.min(until - now));
    }
    true
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Captured>) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}
