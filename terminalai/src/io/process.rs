//! Child-process execution with an optional timeout and bounded output.
//!
//! On Unix the child leads its own process group. A timeout kills the whole
//! group, and so does a shell that exits while something it started still
//! holds the output pipes open. Output collection never waits past
//! [`DRAIN_GRACE`] after the shell is gone.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep draining after the shell has exited.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output as raw bytes.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    /// Exit code, with 124 for timeouts and -1 for signal termination.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            return 124;
        }
        self.status.code().unwrap_or(-1)
    }

    pub fn truncated_notice(stream: &str, truncated: usize) -> String {
        if truncated > 0 {
            format!("\n[{stream} truncated {truncated} bytes]\n")
        } else {
            String::new()
        }
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
///
/// Stdout and stderr are drained on reader threads while the child runs, so a
/// chatty child cannot deadlock on a full pipe. At most `output_limit_bytes`
/// per stream are kept; the rest is counted and discarded. Spawn failures are
/// returned as errors wrapping the underlying [`std::io::Error`].
#[instrument(skip_all, fields(timeout_secs = timeout.map(|t| t.as_secs()), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = cmd.spawn().context("spawn command")?;

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

    let mut timed_out = false;
    let status = match timeout {
        None => child.wait().context("wait for command")?,
        Some(timeout) => match child.wait_timeout(timeout).context("wait for command")? {
            Some(status) => status,
            None => {
                warn!(timeout_secs = timeout.as_secs_f64(), "command timed out, killing");
                timed_out = true;
                kill_tree(&mut child).context("kill command")?;
                child.wait().context("wait command after kill")?
            }
        },
    };
    let duration = started.elapsed();

    if !drain(&stdout_reader, &stderr_reader) {
        warn!("output pipes still open after the shell exited, killing its process group");
        kill_group_after_exit(&child);
        if !drain(&stdout_reader, &stderr_reader) {
            warn!("abandoning output readers that never reached end of stream");
        }
    }

    let (stdout, stdout_truncated) = stdout_reader.take();
    let (stderr, stderr_truncated) = stderr_reader.take();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        duration,
    })
}

/// Whether `err` came from a spawn that failed because the program does not exist.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

/// Wait up to [`DRAIN_GRACE`] for both streams to reach end of stream.
fn drain(stdout: &StreamReader, stderr: &StreamReader) -> bool {
    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout_done = stdout.wait_until(deadline);
    let stderr_done = stderr.wait_until(deadline);
    stdout_done && stderr_done
}

fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        match kill_process_group(child.id()) {
            Ok(()) => return Ok(()),
            Err(err) => warn!(err = %err, "process group kill failed, killing the shell only"),
        }
    }
    child.kill()
}

#[cfg(unix)]
fn kill_group_after_exit(child: &Child) {
    if let Err(err) = kill_process_group(child.id()) {
        warn!(err = %err, "failed to kill leftover process group");
    }
}

#[cfg(not(unix))]
fn kill_group_after_exit(_child: &Child) {}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(pid).map_err(std::io::Error::other)?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // The group is already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Background reader for one output pipe.
///
/// Bytes land in shared storage as they arrive, so a reader that never sees
/// end of stream still yields what it collected.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { captured, done }
    }

    /// Whether the stream finished before `deadline`.
    fn wait_until(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(err = %format!("{err:#}"), "output reader failed");
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            // Already reported, or the reader thread panicked.
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    fn take(&self) -> (Vec<u8>, usize) {
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        let captured = std::mem::take(&mut *captured);
        (captured.bytes, captured.truncated)
    }
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
