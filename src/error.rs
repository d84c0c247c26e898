//! Error taxonomy for an upgrade run.
//!
//! Only [`UpgradeError::StagedBinaryMissing`] and [`UpgradeError::InstallFailed`]
//! abort a run. Everything else is absorbed into the report.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("staged binary not found at {}", path.display())]
    StagedBinaryMissing { path: PathBuf },

    #[error("daemon unreachable: {reason}")]
    DaemonUnreachable { reason: String },

    #[error("stale client")]
    StaleClient { pid: u32 },

    #[error("attach failed: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("failed to install {} to {}: {source}", staged.display(), target.display())]
    InstallFailed {
        staged: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("termination failed: {reason}")]
    TerminationFailed { reason: String },

    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl UpgradeError {
    /// Whether this error must abort the run with a non-zero exit status.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StagedBinaryMissing { .. } | Self::InstallFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;
