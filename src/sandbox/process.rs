//! Bounded child-process execution
//!
//! Runs a command to completion or until its deadline, capturing stdout and
//! stderr under one shared byte budget. Output read before a kill is kept.
//!
//! On Unix the child leads its own process group, so anything it spawns is
//! killed with it when the run ends.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::normalize::RawOutput;
use crate::error::{Error, Result};

/// How long to keep reading pipes after the process is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a bounded run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Exit code, if the process exited normally
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    /// The deadline fired and the process was killed
    pub timed_out: bool,
    /// Output exceeded the byte budget and was cut
    pub truncated: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn into_raw(self) -> RawOutput {
        RawOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
            timed_out: self.timed_out,
        }
    }
}

/// Byte budget shared by the stdout and stderr pumps
struct OutputBudget {
    remaining: AtomicUsize,
    truncated: AtomicBool,
}

impl OutputBudget {
    fn new(limit: usize) -> Self {
        OutputBudget {
            remaining: AtomicUsize::new(limit),
            truncated: AtomicBool::new(false),
        }
    }

    /// Claim up to `wanted` bytes, returning how many may be kept
    fn reserve(&self, wanted: usize) -> usize {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                Some(left.saturating_sub(wanted))
            })
            .unwrap_or(0);
        let granted = previous.min(wanted);
        if granted < wanted {
            self.truncated.store(true, Ordering::SeqCst);
        }
        granted
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

async fn pump<R>(mut reader: R, sink: SharedBuffer, budget: Arc<OutputBudget>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                // Past the budget we keep reading so the child never blocks on a full pipe.
                let keep = budget.reserve(n);
                if keep > 0 {
                    let mut buf = sink.lock().unwrap_or_else(|e| e.into_inner());
                    buf.extend_from_slice(&chunk[..keep]);
                }
            }
            Err(e) => {
                debug!("Pipe read failed: {}", e);
                break;
            }
        }
    }
}

fn snapshot(buffer: &SharedBuffer) -> String {
    let buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>, program: &str) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("Killed process group of {}", program),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group of {}: {}", program, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>, _program: &str) {}

/// Run `command` until it exits or `timeout` elapses.
///
/// The command's stdio is overridden: stdin is null, stdout/stderr are piped.
/// On timeout the process group is killed immediately. Processes left in the
/// group after a normal exit are killed as well.
pub async fn run_bounded(
    mut command: Command,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<ProcessOutcome> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| Error::Sandbox(format!("Failed to spawn {}: {}", program, e)))?;
    let pid = child.id();

    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("stdout pipe missing".to_string()))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("stderr pipe missing".to_string()))?;

    let budget = Arc::new(OutputBudget::new(max_output_bytes));
    let stdout_buf: SharedBuffer = Arc::default();
    let stderr_buf: SharedBuffer = Arc::default();

    let mut stdout_task = tokio::spawn(pump(stdout_pipe, stdout_buf.clone(), budget.clone()));
    let mut stderr_task = tokio::spawn(pump(stderr_pipe, stderr_buf.clone(), budget.clone()));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status
                .map_err(|e| Error::Sandbox(format!("Failed to wait for {}: {}", program, e)))?;
            (status.code().map(i64::from), false)
        }
        Err(_) => {
            warn!("{} timed out after {:?}, killing", program, timeout);
            kill_process_group(pid, &program);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", program, e);
            }
            (None, true)
        }
    };

    kill_process_group(pid, &program);

    // Grandchildren may hold the pipes open; stop waiting after a short grace.
    let drained = tokio::time::timeout(DRAIN_GRACE, async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    })
    .await;
    if drained.is_err() {
        debug!("Output pipes of {} still open after exit", program);
        stdout_task.abort();
        stderr_task.abort();
    }

    let truncated = budget.truncated.load(Ordering::SeqCst);
    if truncated {
        warn!(
            "Output of {} truncated at {} bytes",
            program, max_output_bytes
        );
    }

    Ok(ProcessOutcome {
        exit_code,
        stdout: snapshot(&stdout_buf),
        stderr: snapshot(&stderr_buf),
        timed_out,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_shared_and_capped() {
        let budget = OutputBudget::new(10);
        assert_eq!(budget.reserve(4), 4);
        assert_eq!(budget.reserve(4), 4);
        assert!(!budget.truncated.load(Ordering::SeqCst));
        assert_eq!(budget.reserve(4), 2);
        assert_eq!(budget.reserve(4), 0);
        assert!(budget.truncated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_program() {
        let command = Command::new("pyrun-no-such-binary");
        let err = run_bounded(command, Duration::from_secs(1), 1024)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pyrun-no-such-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_both_streams() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err >&2; exit 3");
        let outcome = run_bounded(command, Duration::from_secs(5), 1024)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo started; sleep 10; echo never");
        let start = std::time::Instant::now();
        let outcome = run_bounded(command, Duration::from_millis(500), 1024)
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(outcome.exit_code.is_none());
        assert_eq!(outcome.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    fn process_running(pid: u32) -> bool {
        // Zombies count as gone: they only wait to be reaped.
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map_or(false, |(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn assert_gone(pid: u32) {
        for _ in 0..30 {
            if !process_running(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("background process {} still running", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 120 & echo $!; sleep 60");
        let start = std::time::Instant::now();
        let outcome = run_bounded(command, Duration::from_millis(500), 1024)
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
        let pid: u32 = outcome.stdout.trim().parse().unwrap();
        assert_gone(pid).await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_exit_kills_leftover_children() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 120 & echo $!");
        let outcome = run_bounded(command, Duration::from_secs(5), 1024)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        let pid: u32 = outcome.stdout.trim().parse().unwrap();
        assert_gone(pid).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_cap() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done");
        let outcome = run_bounded(command, Duration::from_secs(5), 100)
            .await
            .unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.stdout.len() + outcome.stderr.len(), 100);
        assert_eq!(outcome.exit_code, Some(0));
    }
}
