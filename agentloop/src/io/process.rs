//! Child processes with timeouts, cancellation, bounded output and group kill.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Granularity of the wait loop; bounds how late a cancellation is noticed.
const WAIT_SLICE: Duration = Duration::from_millis(50);
/// How long to keep draining pipes after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// Environment variable carrying a per-spawn tag. Descendants inherit it, including
/// ones that moved to another process group or session.
pub const PROCESS_TAG_VAR: &str = "AGENTLOOP_PROCESS_TAG";
/// Passes over `/proc` when sweeping tagged stragglers; each pass can catch a fork.
const SWEEP_PASSES: usize = 3;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Run-level cancellation flag shared by every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

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
    pub duration: Duration,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
            + &truncated_notice("stdout", self.stdout_truncated)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
            + &truncated_notice("stderr", self.stderr_truncated)
    }
}

/// Visible marker appended to bounded output.
pub fn truncated_notice(label: &str, truncated: usize) -> String {
    if truncated > 0 {
        format!("\n[{label} truncated {truncated} bytes]\n")
    } else {
        String::new()
    }
}

#[derive(Debug, Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Run `cmd` in its own process group with a timeout and cooperative cancellation.
///
/// Output is drained concurrently and bounded by `output_limit_bytes` per stream. On
/// timeout or cancellation the whole group is killed. After a normal exit the group is
/// killed as well so background jobs cannot outlive the call.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.process_group(0);
    let tag = format!(
        "{}-{}",
        std::process::id(),
        NEXT_TAG.fetch_add(1, Ordering::Relaxed)
    );
    cmd.env(PROCESS_TAG_VAR, &tag);

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let pgid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    let stdout_handle = spawn_reader(stdout, output_limit_bytes, Arc::clone(&stdout_capture));
    let stderr_handle = spawn_reader(stderr, output_limit_bytes, Arc::clone(&stderr_capture));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        thread::spawn(move || {
            // A child that exits without reading stdin closes the pipe; that is not an error.
            if let Err(e) = child_stdin.write_all(&input)
                && e.kind() != io::ErrorKind::BrokenPipe
            {
                warn!(err = %e, "failed to write child stdin");
            }
        });
    }

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        if let Some(status) = child.wait_timeout(WAIT_SLICE).context("wait for command")? {
            break status;
        }
        if cancel.is_cancelled() {
            warn!("cancellation requested, killing process group");
            cancelled = true;
        } else if started.elapsed() >= timeout {
            warn!(timeout_ms = timeout.as_millis() as u64, "command timed out, killing process group");
            timed_out = true;
        } else {
            continue;
        }
        kill_process_group(pgid);
        break child.wait().context("wait command after kill")?;
    };
    kill_process_group(pgid);
    kill_tagged_processes(&tag);

    let (stdout, stdout_truncated) = finish_reader(stdout_handle, &stdout_capture);
    let (stderr, stderr_truncated) = finish_reader(stderr_handle, &stderr_capture);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    let duration = started.elapsed();
    debug!(exit_code = ?status.code(), timed_out, cancelled, duration_ms = duration.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
        duration,
    })
}

/// SIGKILL every process in group `pgid`. A group that is already gone is fine.
#[allow(unsafe_code)]
pub fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; the group id comes from a child we spawned.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(err = %err, pgid, "failed to kill process group");
        }
    }
}

/// SIGKILL every process whose environment carries `tag`. Returns how many were signalled.
///
/// Catches descendants that left the process group with `setsid` or `setpgid`. A process
/// that also scrubbed its environment is not found.
#[allow(unsafe_code)]
pub fn kill_tagged_processes(tag: &str) -> usize {
    let needle = format!("{PROCESS_TAG_VAR}={tag}");
    let own_pid = std::process::id();
    let mut killed = 0;
    for _ in 0..SWEEP_PASSES {
        let pids = tagged_pids(&needle, own_pid);
        if pids.is_empty() {
            break;
        }
        for pid in pids {
            let Ok(raw) = libc::pid_t::try_from(pid) else {
                continue;
            };
            // SAFETY: kill has no memory-safety preconditions; the pid was read from /proc.
            if unsafe { libc::kill(raw, libc::SIGKILL) } == 0 {
                killed += 1;
            }
        }
    }
    if killed > 0 {
        warn!(killed, "killed processes that left the process group");
    }
    killed
}

/// Pids under `/proc` whose environment contains `needle`. Unreadable entries are skipped.
fn tagged_pids(needle: &str, own_pid: u32) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .filter(|pid| {
            fs::read(format!("/proc/{pid}/environ")).is_ok_and(|environ| {
                environ
                    .split(|b| *b == 0)
                    .any(|var| var == needle.as_bytes())
            })
        })
        .collect()
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    capture: SharedCapture,
) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || read_stream_limited(reader, limit, &capture))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, capture: &SharedCapture) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut guard = capture
            .lock()
            .map_err(|_| anyhow!("output capture lock poisoned"))?;
        let remaining = limit.saturating_sub(guard.buf.len());
        let keep = n.min(remaining);
        guard.buf.extend_from_slice(&chunk[..keep]);
        guard.truncated += n - keep;
    }
}

/// Collect what a reader captured, waiting at most [`DRAIN_GRACE`] for it to hit EOF.
///
/// A descendant that escaped the process group can hold the pipe open forever; in that
/// case the reader thread is left behind and the partial capture is returned.
fn finish_reader(handle: thread::JoinHandle<Result<()>>, capture: &SharedCapture) -> (Vec<u8>, usize) {
    let waited = Instant::now();
    while !handle.is_finished() && waited.elapsed() < DRAIN_GRACE {
        thread::sleep(Duration::from_millis(5));
    }
    if handle.is_finished() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(err = %e, "output reader failed"),
            Err(_) => warn!("output reader thread panicked"),
        }
    } else {
        warn!("output pipe still open after exit; returning partial output");
    }
    match capture.lock() {
        Ok(mut guard) => (std::mem::take(&mut guard.buf), guard.truncated),
        Err(_) => (Vec::new(), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_status() {
        let out = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout, b"out\n");
        assert_eq!(out.stderr, b"err\n");
        assert!(!out.timed_out && !out.cancelled);
    }

    #[test]
    fn bounds_output_with_notice() {
        let out = run_command_with_timeout(
            sh("head -c 5000 /dev/zero | tr '\\0' x"),
            None,
            Duration::from_secs(5),
            100,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(out.stdout.len(), 100);
        assert_eq!(out.stdout_truncated, 4900);
        assert!(out.stdout_text().contains("[stdout truncated 4900 bytes]"));
    }

    #[test]
    fn feeds_stdin() {
        let out = run_command_with_timeout(
            Command::new("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(out.stdout, b"hello");
    }

    /// Live (not zombie) process with this pid.
    fn alive(pid: u32) -> bool {
        let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        let state = stat.rsplit_once(") ").and_then(|(_, rest)| rest.chars().next());
        !matches!(state, Some('Z' | 'X') | None)
    }

    fn wait_until_dead(pid: u32) -> bool {
        let waited = Instant::now();
        while waited.elapsed() < Duration::from_secs(3) {
            if !alive(pid) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn read_pid(path: &std::path::Path) -> u32 {
        let waited = Instant::now();
        loop {
            if let Ok(text) = fs::read_to_string(path)
                && let Ok(pid) = text.trim().parse()
            {
                return pid;
            }
            assert!(waited.elapsed() < Duration::from_secs(3), "pid file never written");
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Verifies a timeout kills the whole group, background children included.
    #[test]
    fn timeout_kills_process_group() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = sh("sleep 30 & echo $! > bg.pid; sleep 30");
        cmd.current_dir(temp.path());
        let started = Instant::now();
        let out = run_command_with_timeout(
            cmd,
            None,
            Duration::from_millis(300),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        let pid = read_pid(&temp.path().join("bg.pid"));
        assert!(wait_until_dead(pid), "background child {pid} survived the timeout");
    }

    /// Verifies a child that moved to its own session is still killed on timeout.
    #[test]
    fn timeout_kills_child_in_new_session() {
        if !["/usr/bin/setsid", "/bin/setsid"]
            .iter()
            .any(|p| std::path::Path::new(p).exists())
        {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = sh(
            "setsid sh -c 'echo $$ > escaped.pid; exec sleep 30' >/dev/null 2>&1 </dev/null & sleep 30",
        );
        cmd.current_dir(temp.path());
        let out = run_command_with_timeout(
            cmd,
            None,
            Duration::from_millis(500),
            1024,
            &CancelToken::new(),
        )
        .expect("run");
        assert!(out.timed_out);
        let pid = read_pid(&temp.path().join("escaped.pid"));
        assert!(wait_until_dead(pid), "child {pid} in a new session survived the timeout");
    }

    #[test]
    fn sweep_without_tagged_processes_kills_nothing() {
        assert_eq!(kill_tagged_processes("no-such-tag"), 0);
    }

    #[test]
    fn cancellation_stops_child() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let started = Instant::now();
        let out = run_command_with_timeout(sh("sleep 30"), None, Duration::from_secs(60), 1024, &cancel)
            .expect("run");
        canceller.join().expect("join");
        assert!(out.cancelled);
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/nonexistent/binary"),
            None,
            Duration::from_secs(1),
            16,
            &CancelToken::new(),
        )
        .expect_err("spawn should fail");
        assert!(err.to_string().contains("spawn command"));
    }
}
