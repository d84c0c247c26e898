//! Name-based termination of every running daemon instance.
//!
//! Instances are found by exact process name, asked to exit with SIGTERM, and
//! given a bounded grace period. Survivors get SIGKILL and one more grace
//! period. Finding nothing to stop is a success.

use nix::sys::signal::Signal;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::error::{Result, UpgradeError};
use crate::process::{is_process_alive, pids_by_name, send_signal};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stops all daemon instances before the executable is swapped.
pub trait Terminator {
    fn stop_all(&self) -> Result<TerminationReport>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Instances running when termination started
    pub found: usize,
    /// Exited after SIGTERM
    pub terminated: usize,
    /// Needed SIGKILL
    pub killed: usize,
    /// Still alive after both grace periods
    pub survivors: Vec<u32>,
}

impl TerminationReport {
    pub fn is_clean(&self) -> bool {
        self.survivors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct NameTerminator {
    process_name: String,
    grace: Duration,
}

impl NameTerminator {
    pub fn new(process_name: impl Into<String>, grace: Duration) -> Self {
        Self {
            process_name: process_name.into(),
            grace,
        }
    }

    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self::new(config.daemon_name.clone(), config.termination_timeout())
    }

    fn signal_all(&self, pids: &[u32], signal: Signal) {
        for &pid in pids {
            if let Err(e) = send_signal(pid, signal) {
                warn!(pid, %signal, "{e:#}");
            }
        }
    }
}

impl Terminator for NameTerminator {
    fn stop_all(&self) -> Result<TerminationReport> {
        let pids = pids_by_name(&self.process_name).map_err(|e| UpgradeError::TerminationFailed {
            reason: format!("{e:#}"),
        })?;

        let mut report = TerminationReport {
            found: pids.len(),
            ..Default::default()
        };

        if pids.is_empty() {
            info!(name = %self.process_name, "No running daemon instances");
            return Ok(report);
        }

        info!(name = %self.process_name, ?pids, "Stopping daemon instances");
        self.signal_all(&pids, Signal::SIGTERM);
        let remaining = wait_for_exit(&pids, self.grace);
        report.terminated = pids.len() - remaining.len();

        if remaining.is_empty() {
            return Ok(report);
        }

        warn!(pids = ?remaining, "Instances ignored SIGTERM, escalating to SIGKILL");
        self.signal_all(&remaining, Signal::SIGKILL);
        let survivors = wait_for_exit(&remaining, self.grace);
        report.killed = remaining.len() - survivors.len();
        report.survivors = survivors;

        Ok(report)
    }
}

/// Poll until every PID is gone or `grace` elapses. Returns the PIDs still alive.
fn wait_for_exit(pids: &[u32], grace: Duration) -> Vec<u32> {
    let deadline = Instant::now() + grace;
    loop {
        let alive: Vec<u32> = pids.iter().copied().filter(|&pid| is_process_alive(pid)).collect();
        if alive.is_empty() || Instant::now() >= deadline {
            debug!(?alive, "Finished waiting for exit");
            return alive;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
