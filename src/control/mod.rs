//! Daemon control client.
//!
//! Talks to whichever daemon instance is live through the daemon executable's
//! own control subcommands:
//!
//! ```text
//! cod api list-clients            -> "<pid> <shell>" per line
//! cod api attach <pid> <shell>    -> exit 0 on success
//! ```
//!
//! `attach` starts the daemon if none is running, so reattachment after an
//! install needs no explicit start step.

pub mod exec;

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::UpgradeConfig;
use crate::error::{Result, UpgradeError};
use crate::process::is_process_alive;
use crate::session::{parse_client_listing, Session};
use exec::run_with_timeout;

/// Control-plane operations the orchestrator needs from a daemon.
pub trait DaemonControl {
    /// Every client currently attached to the running daemon.
    fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Re-register `session` with the daemon, starting it if necessary.
    fn attach(&self, session: &Session) -> Result<()>;
}

/// [`DaemonControl`] backed by invoking the daemon executable.
#[derive(Debug, Clone)]
pub struct CommandControl {
    install_path: PathBuf,
    daemon_name: String,
    control_args: Vec<String>,
    timeout: Duration,
}

impl CommandControl {
    pub fn new(install_path: PathBuf, daemon_name: impl Into<String>) -> Self {
        Self {
            install_path,
            daemon_name: daemon_name.into(),
            control_args: vec!["api".to_string()],
            timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &UpgradeConfig) -> Self {
        Self {
            install_path: config.install_path(),
            daemon_name: config.daemon_name.clone(),
            control_args: config.control_args.clone(),
            timeout: config.control_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The installed executable, or the daemon found on `PATH` when nothing is
    /// installed at the expected location yet.
    fn resolve_program(&self) -> Result<PathBuf> {
        if self.install_path.is_file() {
            return Ok(self.install_path.clone());
        }

        which::which(&self.daemon_name).map_err(|e| UpgradeError::DaemonUnreachable {
            reason: format!(
                "no executable at {} and {} not on PATH: {e}",
                self.install_path.display(),
                self.daemon_name
            ),
        })
    }

    fn args(&self, tail: &[&str]) -> Vec<String> {
        self.control_args
            .iter()
            .cloned()
            .chain(tail.iter().map(|s| s.to_string()))
            .collect()
    }
}

impl DaemonControl for CommandControl {
    fn list_sessions(&self) -> Result<Vec<Session>> {
        let program = self.resolve_program()?;
        let args = self.args(&["list-clients"]);
        debug!(program = %program.display(), ?args, "Listing daemon clients");

        let output = run_with_timeout(&program, &args, self.timeout).map_err(|e| {
            UpgradeError::DaemonUnreachable {
                reason: format!("{e:#}"),
            }
        })?;

        if output.timed_out() {
            return Err(UpgradeError::Timeout {
                operation: "list-clients",
                after: self.timeout,
            });
        }
        if !output.success() {
            return Err(UpgradeError::DaemonUnreachable {
                reason: output.failure_reason(),
            });
        }

        Ok(parse_client_listing(&output.stdout))
    }

    fn attach(&self, session: &Session) -> Result<()> {
        let pid = session.client_process_id;
        let program = self.resolve_program()?;
        let pid_arg = pid.to_string();
        let args = self.args(&["attach", &pid_arg, session.shell_kind.as_str()]);
        debug!(program = %program.display(), pid, shell = %session.shell_kind, "Reattaching client");

        let output = run_with_timeout(&program, &args, self.timeout).map_err(|e| {
            UpgradeError::AttachFailed {
                pid,
                reason: format!("{e:#}"),
            }
        })?;

        if output.timed_out() {
            return Err(UpgradeError::Timeout {
                operation: "attach",
                after: self.timeout,
            });
        }
        if output.success() {
            return Ok(());
        }

        if !is_process_alive(pid) {
            return Err(UpgradeError::StaleClient { pid });
        }

        let reason = output.failure_reason();
        warn!(pid, %reason, "Daemon rejected attach for a live client");
        Err(UpgradeError::AttachFailed { pid, reason })
    }
}
