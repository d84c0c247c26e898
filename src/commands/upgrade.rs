//! Upgrade command - swaps in the staged daemon build and reattaches shells

use anyhow::Result;
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::UpgradeConfig;
use crate::control::CommandControl;
use crate::error::UpgradeError;
use crate::installer::FileInstaller;
use crate::orchestrator::{AttachOutcome, Upgrade, UpgradePhase, UpgradeReport};
use crate::terminator::NameTerminator;

/// Command-line overrides layered on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub config: Option<PathBuf>,
    pub staged: Option<PathBuf>,
    pub install_path: Option<PathBuf>,
    pub daemon_name: Option<String>,
}

impl UpgradeOptions {
    fn resolve(self) -> Result<UpgradeConfig> {
        let mut config = UpgradeConfig::load(self.config.as_deref())?;
        if let Some(name) = self.daemon_name {
            config.daemon_name = name;
        }
        if let Some(staged) = self.staged {
            config.staged_path = Some(staged);
        }
        if let Some(install_path) = self.install_path {
            config.install_path = Some(install_path);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Execute the upgrade.
///
/// Fails only when the staged build is missing or the install itself fails.
/// Sessions that could not be reattached are reported but do not fail the run.
pub fn execute(options: UpgradeOptions) -> Result<()> {
    let config = options.resolve()?;
    let staged = config.staged_path();
    let install_path = config.install_path();

    println!(
        "{} Upgrading {} from {}",
        "→".cyan().bold(),
        config.daemon_name.bold(),
        staged.display().to_string().dimmed()
    );

    let mut upgrade = Upgrade::new(
        CommandControl::from_config(&config),
        NameTerminator::from_config(&config),
        FileInstaller::new(),
        staged.clone(),
        install_path.clone(),
    );

    let result = upgrade.run();
    let report = result.map_err(|e| explain(e, upgrade.phase(), &staged, &install_path))?;
    print_report(&report);
    Ok(())
}

/// Attach a hint describing what state the run left the system in.
fn explain(
    err: UpgradeError,
    phase: UpgradePhase,
    staged: &Path,
    install_path: &Path,
) -> anyhow::Error {
    let hint = match phase {
        UpgradePhase::Aborted => format!(
            "Nothing was changed. Build the daemon to {} and retry",
            staged.display()
        ),
        UpgradePhase::Failed => format!(
            "The daemon is stopped and {} was not replaced. Move the build into place manually",
            install_path.display()
        ),
        _ => "Upgrade failed".to_string(),
    };
    anyhow::Error::new(err).context(hint)
}

fn print_report(report: &UpgradeReport) {
    match &report.snapshot_error {
        Some(reason) => println!(
            "  {} No sessions captured ({})",
            "─".dimmed(),
            reason.dimmed()
        ),
        None => println!(
            "  {} Captured {} session(s)",
            "✓".green(),
            report.sessions_found()
        ),
    }

    let termination = &report.termination;
    if let Some(reason) = &report.termination_error {
        println!("  {} Could not stop daemon: {}", "⚠".yellow(), reason);
    } else if termination.found == 0 {
        println!("  {} No running daemon", "─".dimmed());
    } else {
        println!(
            "  {} Stopped {} instance(s)",
            "✓".green(),
            termination.terminated + termination.killed
        );
    }
    if !termination.survivors.is_empty() {
        println!(
            "  {} Still running after SIGKILL: {:?}",
            "⚠".yellow(),
            termination.survivors
        );
    }

    println!(
        "  {} Installed {}",
        "✓".green(),
        report.install.target.display()
    );
    println!("  {} SHA-256: {}", "ℹ".blue(), report.install.sha256.dimmed());

    for outcome in &report.outcomes {
        match &outcome.outcome {
            AttachOutcome::Reattached => {
                println!("  {} {} reattached", "✓".green(), outcome.session)
            }
            AttachOutcome::Failed { reason } => {
                println!("  {} {}: {}", "✗".red(), outcome.session, reason.red())
            }
        }
    }

    if report.failed() == 0 {
        println!("{} {}", "✓".green().bold(), report);
    } else {
        println!("{} {}", "⚠".yellow().bold(), report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_overrides_win_over_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("upgrade.toml");
        fs::write(
            &config_path,
            "daemon_name = \"cod-test\"\nstaged_path = \"from-file\"\n",
        )
        .unwrap();

        let config = UpgradeOptions {
            config: Some(config_path),
            staged: Some(PathBuf::from("from-cli")),
            install_path: Some(PathBuf::from("/tmp/bin/cod")),
            daemon_name: None,
        }
        .resolve()
        .unwrap();

        assert_eq!(config.daemon_name, "cod-test");
        assert_eq!(config.staged_path(), PathBuf::from("from-cli"));
        assert_eq!(config.install_path(), PathBuf::from("/tmp/bin/cod"));
    }

    #[test]
    fn test_overridden_daemon_name_is_validated() {
        let err = UpgradeOptions {
            daemon_name: Some("cod-with-a-long-name".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap_err();
        assert!(err.to_string().contains("cod-with-a-long-name"));
    }

    #[test]
    fn test_missing_staged_build_fails_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let install_path = dir.path().join("bin/cod");

        let err = execute(UpgradeOptions {
            config: None,
            staged: Some(dir.path().join("cod")),
            install_path: Some(install_path.clone()),
            daemon_name: Some("cu-absent".to_string()),
        })
        .unwrap_err();

        assert!(err.to_string().contains("Nothing was changed"));
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::StagedBinaryMissing { .. })
        ));
        assert!(!install_path.exists());
    }
}
