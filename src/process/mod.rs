//! Process helpers: liveness probing, lookup by process name, signal delivery.

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Command;
use tracing::debug;

/// Longest process name the kernel keeps (`TASK_COMM_LEN` minus the NUL).
/// `pgrep -x` compares against that truncated name, so longer names never match.
pub const MAX_PROCESS_NAME_LEN: usize = 15;

/// Check if a process with the given PID exists.
///
/// Sends the null signal. `EPERM` still means the process exists, it just
/// belongs to someone else.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// PIDs of every running process whose name is exactly `name`.
///
/// The calling process is never included.
pub fn pids_by_name(name: &str) -> Result<Vec<u32>> {
    let output = Command::new("pgrep")
        .arg("-x")
        .arg(name)
        .output()
        .context("Failed to run pgrep")?;

    // pgrep exits 1 when nothing matched
    match output.status.code() {
        Some(0) => {}
        Some(1) => return Ok(Vec::new()),
        _ => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("pgrep -x {name} failed ({}): {}", output.status, stderr.trim());
        }
    }

    let own_pid = std::process::id();
    let pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .filter(|pid| *pid != own_pid)
        .collect();

    debug!(name, ?pids, "Matched processes by name");
    Ok(pids)
}

/// Deliver `signal` to `pid`. A process that is already gone is not an error.
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let raw = i32::try_from(pid).with_context(|| format!("PID {pid} out of range"))?;

    match kill(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to send {signal} to PID {pid}")),
    }
}
