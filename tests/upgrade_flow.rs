//! End-to-end upgrade runs against fake daemon executables.
//!
//! Each fake daemon is a small shell script answering `api list-clients` and
//! `api attach <pid> <shell>`, logging every attach to a file so the tests can
//! check what the freshly installed build was asked to do.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cod_upgrade::commands::upgrade::{self, UpgradeOptions};
use cod_upgrade::control::CommandControl;
use cod_upgrade::installer::FileInstaller;
use cod_upgrade::orchestrator::{AttachOutcome, Upgrade, UpgradePhase};
use cod_upgrade::terminator::NameTerminator;
use cod_upgrade::UpgradeError;
use serial_test::serial;
use tempfile::TempDir;

/// Never running, so termination always finds nothing.
const ABSENT_DAEMON: &str = "cu-flow-absent";

/// Above any real pid_max, so the liveness probe reports it gone.
const DEAD_PID: u32 = 999_999_999;

struct Workspace {
    _dir: TempDir,
    staged: PathBuf,
    installed: PathBuf,
    attach_log: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let staged = dir.path().join("build").join("cod");
        let installed = dir.path().join("home/.local/bin/cod");
        let attach_log = dir.path().join("attach.log");
        fs::create_dir_all(staged.parent().unwrap()).unwrap();
        Self {
            _dir: dir,
            staged,
            installed,
            attach_log,
        }
    }

    /// A fake daemon that lists `clients` and accepts attach for every pid except
    /// `DEAD_PID`.
    fn daemon_script(&self, version: &str, clients: &[(u32, &str)]) -> String {
        let listing: String = clients
            .iter()
            .map(|(pid, shell)| format!("{pid}\\t{shell}\\n"))
            .collect();
        format!(
            r#"#!/bin/sh
# fake cod {version}
[ "$1" = api ] || exit 64
case "$2" in
  list-clients) printf '{listing}' ;;
  attach)
    echo "$3 $4" >> '{log}'
    [ "$3" = {dead} ] && exit 1
    exit 0 ;;
  *) exit 64 ;;
esac
"#,
            log = self.attach_log.display(),
            dead = DEAD_PID,
        )
    }

    fn install_old(&self, clients: &[(u32, &str)]) {
        fs::create_dir_all(self.installed.parent().unwrap()).unwrap();
        write_executable(&self.installed, &self.daemon_script("v1", clients));
    }

    fn stage(&self, version: &str) {
        write_executable(&self.staged, &self.daemon_script(version, &[]));
    }

    fn upgrade(&self) -> Upgrade<CommandControl, NameTerminator, FileInstaller> {
        Upgrade::new(
            CommandControl::new(self.installed.clone(), ABSENT_DAEMON)
                .with_timeout(Duration::from_secs(5)),
            NameTerminator::new(ABSENT_DAEMON, Duration::from_millis(200)),
            FileInstaller::new(),
            self.staged.clone(),
            self.installed.clone(),
        )
    }

    fn attach_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.attach_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn write_executable(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
#[serial]
fn test_upgrade_reattaches_and_reports_stale_client() {
    let ws = Workspace::new();
    ws.install_old(&[(4821, "bash"), (DEAD_PID, "fish")]);
    ws.stage("v2");

    let mut upgrade = ws.upgrade();
    let report = upgrade.run().expect("upgrade should succeed");

    assert_eq!(upgrade.phase(), UpgradePhase::Done);
    assert_eq!(
        report.to_string(),
        format!("2 sessions found, 1 reattached, 1 failed ({DEAD_PID}: stale client)")
    );
    assert_eq!(report.outcome_for(4821), Some(&AttachOutcome::Reattached));

    // reattachment went to the new build, in snapshot order
    assert_eq!(
        ws.attach_lines(),
        vec!["4821 bash".to_string(), format!("{DEAD_PID} fish")]
    );
    let installed = fs::read_to_string(&ws.installed).unwrap();
    assert!(installed.contains("fake cod v2"));
    assert!(!ws.staged.exists());
}

#[test]
#[serial]
fn test_upgrade_without_daemon_still_installs() {
    let ws = Workspace::new();
    ws.stage("v2");

    let mut upgrade = ws.upgrade();
    let report = upgrade.run().expect("upgrade should succeed");

    assert!(report.snapshot.is_empty());
    assert!(report.snapshot_error.is_some());
    assert!(report.outcomes.is_empty());
    assert!(ws.attach_lines().is_empty());
    assert!(fs::read_to_string(&ws.installed)
        .unwrap()
        .contains("fake cod v2"));
}

#[test]
#[serial]
fn test_two_consecutive_upgrades_install_latest_build() {
    let ws = Workspace::new();
    ws.install_old(&[]);

    ws.stage("v2");
    let first = ws.upgrade().run().expect("first upgrade should succeed");
    assert_eq!(first.termination.found, 0);

    ws.stage("v3");
    let second = ws.upgrade().run().expect("second upgrade should succeed");
    assert_eq!(second.termination.found, 0);
    assert!(second.termination_error.is_none());

    let installed = fs::read_to_string(&ws.installed).unwrap();
    assert!(installed.contains("fake cod v3"));
    assert_ne!(first.install.sha256, second.install.sha256);
}

#[test]
#[serial]
fn test_missing_staged_build_leaves_install_untouched() {
    let ws = Workspace::new();
    ws.install_old(&[(4821, "bash")]);

    let mut upgrade = ws.upgrade();
    let err = upgrade.run().unwrap_err();

    assert!(matches!(err, UpgradeError::StagedBinaryMissing { .. }));
    assert_eq!(upgrade.phase(), UpgradePhase::Aborted);
    assert!(fs::read_to_string(&ws.installed)
        .unwrap()
        .contains("fake cod v1"));
    assert!(ws.attach_lines().is_empty());
}

#[test]
#[serial]
fn test_staged_build_vanishing_after_stop_reports_install_failure() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.installed.parent().unwrap()).unwrap();
    write_executable(
        &ws.installed,
        &format!(
            "#!/bin/sh\n# fake cod v1\nrm -f '{}'\nprintf '4821\\tbash\\n'\n",
            ws.staged.display()
        ),
    );
    ws.stage("v2");

    let err = upgrade::execute(UpgradeOptions {
        config: None,
        staged: Some(ws.staged.clone()),
        install_path: Some(ws.installed.clone()),
        daemon_name: Some(ABSENT_DAEMON.to_string()),
    })
    .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("was not replaced"), "{message}");
    assert!(!message.contains("Nothing was changed"), "{message}");
    match err.downcast_ref::<UpgradeError>() {
        Some(UpgradeError::InstallFailed { source, .. }) => {
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected InstallFailed, got {other:?}"),
    }
    assert!(fs::read_to_string(&ws.installed)
        .unwrap()
        .contains("fake cod v1"));
}

#[test]
#[serial]
fn test_upgrade_command_end_to_end() {
    let ws = Workspace::new();
    ws.install_old(&[(4821, "bash")]);
    ws.stage("v2");

    upgrade::execute(UpgradeOptions {
        config: None,
        staged: Some(ws.staged.clone()),
        install_path: Some(ws.installed.clone()),
        daemon_name: Some(ABSENT_DAEMON.to_string()),
    })
    .expect("upgrade command should succeed");

    assert_eq!(ws.attach_lines(), vec!["4821 bash".to_string()]);
}
