//! Upgrade configuration.
//!
//! Read from `<config_dir>/cod/upgrade.toml` when present. Every field has a
//! default, so the file is optional and may set any subset of keys.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::process::MAX_PROCESS_NAME_LEN;

pub const DEFAULT_DAEMON_NAME: &str = "cod";
pub const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TERMINATION_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Process name of the daemon; used for name-based termination and `PATH` lookup
    pub daemon_name: String,
    /// Arguments placed before every control operation (`<daemon> api list-clients`)
    pub control_args: Vec<String>,
    /// New build awaiting installation; relative paths resolve against the working directory
    pub staged_path: Option<PathBuf>,
    /// Installed executable; defaults to `~/.local/bin/<daemon_name>`
    pub install_path: Option<PathBuf>,
    pub control_timeout_secs: u64,
    pub termination_timeout_secs: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            daemon_name: DEFAULT_DAEMON_NAME.to_string(),
            control_args: vec!["api".to_string()],
            staged_path: None,
            install_path: None,
            control_timeout_secs: DEFAULT_CONTROL_TIMEOUT_SECS,
            termination_timeout_secs: DEFAULT_TERMINATION_TIMEOUT_SECS,
        }
    }
}

impl UpgradeConfig {
    /// `<config_dir>/cod/upgrade.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(DEFAULT_DAEMON_NAME).join("upgrade.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is used if
    /// it exists, otherwise built-in defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No upgrade config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        debug!(path = %path.display(), "Loading upgrade config");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a run silently lose sessions or miss
    /// the running daemon.
    pub fn validate(&self) -> Result<()> {
        if self.daemon_name.trim().is_empty() {
            bail!("daemon_name must not be empty");
        }
        if self.daemon_name.len() > MAX_PROCESS_NAME_LEN {
            bail!(
                "daemon_name '{}' is longer than {} bytes and cannot be matched by process name",
                self.daemon_name,
                MAX_PROCESS_NAME_LEN
            );
        }
        if self.control_timeout_secs == 0 {
            bail!("control_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn staged_path(&self) -> PathBuf {
        self.staged_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.daemon_name))
    }

    pub fn install_path(&self) -> PathBuf {
        if let Some(path) = &self.install_path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join(".local")
            .join("bin")
            .join(&self.daemon_name)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn termination_timeout(&self) -> Duration {
        Duration::from_secs(self.termination_timeout_secs)
    }
}
