//! Upgrade orchestration.
//!
//! One run walks a fixed sequence and never reorders it:
//!
//! ```text
//! Idle → Verifying → Snapshotting → Terminating → Installing → Reattaching → Done
//!            │                                        │
//!            └─→ Aborted (no staged build)            └─→ Failed (install error)
//! ```
//!
//! The session snapshot is taken once, before anything is stopped. Reattachment
//! replays it in order, one session at a time, and a failed session never stops
//! the ones after it.

mod report;


pub use report::{AttachOutcome, SessionOutcome, UpgradeReport};

use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::control::DaemonControl;
use crate::error::Result;
use crate::installer::Installer;
use crate::session::Session;
use crate::terminator::{TerminationReport, Terminator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePhase {
    Idle,
    Verifying,
    Snapshotting,
    Terminating,
    Installing,
    Reattaching,
    Done,
    Aborted,
    Failed,
}

impl UpgradePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted | Self::Failed)
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::Snapshotting => "snapshotting",
            Self::Terminating => "terminating",
            Self::Installing => "installing",
            Self::Reattaching => "reattaching",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single upgrade run over its three collaborators.
///
/// Not safe to run concurrently with another upgrade of the same daemon; the
/// caller is expected to guarantee a single run at a time.
pub struct Upgrade<C, T, I> {
    control: C,
    terminator: T,
    installer: I,
    staged_path: PathBuf,
    install_path: PathBuf,
    phase: UpgradePhase,
}

impl<C, T, I> Upgrade<C, T, I>
where
    C: DaemonControl,
    T: Terminator,
    I: Installer,
{
    pub fn new(
        control: C,
        terminator: T,
        installer: I,
        staged_path: PathBuf,
        install_path: PathBuf,
    ) -> Self {
        Self {
            control,
            terminator,
            installer,
            staged_path,
            install_path,
            phase: UpgradePhase::Idle,
        }
    }

    pub fn phase(&self) -> UpgradePhase {
        self.phase
    }

    fn enter(&mut self, phase: UpgradePhase) {
        info!(from = %self.phase, to = %phase, "Upgrade phase");
        self.phase = phase;
    }

    /// Execute the whole upgrade.
    ///
    /// Returns `Err` only for a missing staged build (nothing was touched) or a
    /// failed install (daemon stopped, nothing new in place). Every other
    /// failure ends up in the report.
    pub fn run(&mut self) -> Result<UpgradeReport> {
        self.enter(UpgradePhase::Verifying);
        if let Err(e) = self.installer.check_staged(&self.staged_path) {
            self.enter(UpgradePhase::Aborted);
            return Err(e);
        }

        self.enter(UpgradePhase::Snapshotting);
        let (snapshot, snapshot_error) = self.snapshot();

        self.enter(UpgradePhase::Terminating);
        let (termination, termination_error) = self.terminate();

        self.enter(UpgradePhase::Installing);
        let install = match self.installer.install(&self.staged_path, &self.install_path) {
            Ok(receipt) => receipt,
            Err(e) => {
                if !snapshot.is_empty() {
                    let pids: Vec<u32> = snapshot.iter().map(|s| s.client_process_id).collect();
                    error!(?pids, "Sessions left detached; daemon is stopped and must be reinstalled manually");
                }
                self.enter(UpgradePhase::Failed);
                return Err(e);
            }
        };

        self.enter(UpgradePhase::Reattaching);
        let outcomes = self.reattach(&snapshot);

        self.enter(UpgradePhase::Done);
        Ok(UpgradeReport {
            snapshot,
            snapshot_error,
            termination,
            termination_error,
            install,
            outcomes,
        })
    }

    /// Capture live sessions. Any failure counts as "no sessions to preserve".
    fn snapshot(&self) -> (Vec<Session>, Option<String>) {
        match self.control.list_sessions() {
            Ok(sessions) => {
                info!(count = sessions.len(), "Captured session snapshot");
                (sessions, None)
            }
            Err(e) => {
                warn!("Treating snapshot as empty: {e}");
                (Vec::new(), Some(e.to_string()))
            }
        }
    }

    fn terminate(&self) -> (TerminationReport, Option<String>) {
        match self.terminator.stop_all() {
            Ok(report) => {
                if !report.is_clean() {
                    warn!(pids = ?report.survivors, "Daemon instances survived termination");
                }
                (report, None)
            }
            Err(e) => {
                warn!("Continuing without confirmed termination: {e}");
                (TerminationReport::default(), Some(e.to_string()))
            }
        }
    }

    fn reattach(&self, snapshot: &[Session]) -> Vec<SessionOutcome> {
        snapshot
            .iter()
            .map(|session| {
                let outcome = match self.control.attach(session) {
                    Ok(()) => {
                        info!(pid = session.client_process_id, shell = %session.shell_kind, "Reattached");
                        AttachOutcome::Reattached
                    }
                    Err(e) => {
                        warn!(pid = session.client_process_id, shell = %session.shell_kind, "Reattach failed: {e}");
                        AttachOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                };
                SessionOutcome {
                    session: session.clone(),
                    outcome,
                }
            })
            .collect()
    }
}
