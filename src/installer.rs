//! Atomic replacement of the installed daemon executable.
//!
//! The staged build is moved into place with `rename`, so a concurrent start of
//! the daemon sees either the old file or the complete new one. When the staged
//! file lives on another filesystem the bytes are first copied into a temp file
//! next to the target and that temp file is renamed over it instead.

use nix::errno::Errno;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, UpgradeError};

/// Installs a staged daemon build.
pub trait Installer {
    /// Fail with [`UpgradeError::StagedBinaryMissing`] unless `staged` is a usable build.
    fn check_staged(&self, staged: &Path) -> Result<()>;

    /// Move `staged` over `target`. Every failure, including a staged build that
    /// vanished after [`Installer::check_staged`], is [`UpgradeError::InstallFailed`].
    fn install(&self, staged: &Path, target: &Path) -> Result<InstallReceipt>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReceipt {
    pub target: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileInstaller;

impl FileInstaller {
    pub fn new() -> Self {
        Self
    }
}

impl Installer for FileInstaller {
    fn check_staged(&self, staged: &Path) -> Result<()> {
        let missing = || UpgradeError::StagedBinaryMissing {
            path: staged.to_path_buf(),
        };

        let metadata = fs::metadata(staged).map_err(|_| missing())?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(missing());
        }
        Ok(())
    }

    fn install(&self, staged: &Path, target: &Path) -> Result<InstallReceipt> {
        let failed = |source: io::Error| UpgradeError::InstallFailed {
            staged: staged.to_path_buf(),
            target: target.to_path_buf(),
            source,
        };

        let sha256 = sha256_file(staged).map_err(failed)?;
        debug!(staged = %staged.display(), %sha256, "Staged build checksum");

        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(failed)?;
        make_executable(staged).map_err(failed)?;

        match fs::rename(staged, target) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
                debug!("Staged build is on another filesystem, copying into place");
                copy_into_place(staged, target, parent).map_err(failed)?;
                if let Err(e) = fs::remove_file(staged) {
                    warn!(staged = %staged.display(), "Failed to remove staged build: {e}");
                }
            }
            Err(e) => return Err(failed(e)),
        }

        info!(target = %target.display(), "Installed new daemon executable");
        Ok(InstallReceipt {
            target: target.to_path_buf(),
            sha256,
        })
    }
}

/// Copy `staged` into a temp file in `dir`, then rename it over `target`.
fn copy_into_place(staged: &Path, target: &Path, dir: &Path) -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(staged)?, &mut temp)?;
    temp.as_file().sync_all()?;
    make_executable(temp.path())?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
