//! Outcome of one upgrade run.

use std::fmt;

use crate::installer::InstallReceipt;
use crate::session::Session;
use crate::terminator::TerminationReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Reattached,
    Failed { reason: String },
}

impl AttachOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttachOutcome::Reattached)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session: Session,
    pub outcome: AttachOutcome,
}

/// Everything observed during a completed run.
///
/// `snapshot` and `outcomes` are both in the order the daemon listed the
/// sessions.
#[derive(Debug, Clone)]
pub struct UpgradeReport {
    pub snapshot: Vec<Session>,
    /// Set when the snapshot could not be taken and was treated as empty
    pub snapshot_error: Option<String>,
    pub termination: TerminationReport,
    /// Set when termination could not be carried out; the run continued anyway
    pub termination_error: Option<String>,
    pub install: InstallReceipt,
    pub outcomes: Vec<SessionOutcome>,
}

impl UpgradeReport {
    pub fn sessions_found(&self) -> usize {
        self.snapshot.len()
    }

    pub fn reattached(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (u32, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            AttachOutcome::Failed { reason } => Some((o.session.client_process_id, reason.as_str())),
            AttachOutcome::Reattached => None,
        })
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn outcome_for(&self, pid: u32) -> Option<&AttachOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.session.client_process_id == pid)
            .map(|o| &o.outcome)
    }
}

impl fmt::Display for UpgradeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let found = self.sessions_found();
        write!(
            f,
            "{found} {} found, {} reattached, {} failed",
            if found == 1 { "session" } else { "sessions" },
            self.reattached(),
            self.failed()
        )?;

        let failures: Vec<String> = self
            .failures()
            .map(|(pid, reason)| format!("{pid}: {reason}"))
            .collect();
        if !failures.is_empty() {
            write!(f, " ({})", failures.join(", "))?;
        }
        Ok(())
    }
}
