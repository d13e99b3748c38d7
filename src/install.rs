use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use crate::error::{AcquireError, Result};
use crate::util::{make_executable, sha256_file};

/// An executable placed at its canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    pub path: PathBuf,
    pub sha256: String,
}

/// Places binaries into the binary directory.
///
/// Content is written to a uniquely named `.tmp` file next to the destination,
/// marked executable and then renamed over the final path, so a failed
/// download or build never clobbers a working binary.
#[derive(Debug, Clone)]
pub struct Installer {
    binary_dir: PathBuf,
}

impl Installer {
    pub fn new(binary_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_dir: binary_dir.into(),
        }
    }

    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    /// Canonical install path for an executable name.
    pub fn install_path(&self, binary: &str) -> PathBuf {
        self.binary_dir.join(binary)
    }

    /// Path of the backup kept for an executable name.
    pub fn backup_path(&self, binary: &str) -> PathBuf {
        self.binary_dir.join(format!("{binary}.backup"))
    }

    /// Installs whatever `write` puts into the temp file.
    pub fn install_with<F>(&self, binary: &str, backup: bool, write: F) -> Result<InstalledBinary>
    where
        F: FnOnce(&mut File) -> Result<()>,
    {
        fs::create_dir_all(&self.binary_dir)
            .map_err(|e| AcquireError::io(format!("creating {}", self.binary_dir.display()), e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{binary}."))
            .suffix(".tmp")
            .tempfile_in(&self.binary_dir)
            .map_err(|e| AcquireError::io("creating temp file", e))?;
        debug!(tmp = %tmp.path().display(), "writing binary");

        write(tmp.as_file_mut())?;
        tmp.as_file_mut()
            .flush()
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| AcquireError::io("flushing temp file", e))?;
        make_executable(tmp.path())
            .map_err(|e| AcquireError::io(format!("chmod {}", tmp.path().display()), e))?;

        if backup {
            self.backup_existing(binary);
        }

        let dest = self.install_path(binary);
        tmp.persist(&dest)
            .map_err(|e| AcquireError::io(format!("renaming into {}", dest.display()), e.error))?;
        let sha256 = sha256_file(&dest)
            .map_err(|e| AcquireError::io(format!("hashing {}", dest.display()), e))?;
        info!(path = %dest.display(), %sha256, "installed binary");
        Ok(InstalledBinary { path: dest, sha256 })
    }

    /// Installs a copy of an existing file, e.g. a freshly built artifact.
    pub fn install_file(&self, binary: &str, source: &Path, backup: bool) -> Result<InstalledBinary> {
        self.install_with(binary, backup, |out| {
            let mut input = File::open(source)
                .map_err(|e| AcquireError::io(format!("opening {}", source.display()), e))?;
            std::io::copy(&mut input, out)
                .map_err(|e| AcquireError::io(format!("copying {}", source.display()), e))?;
            Ok(())
        })
    }

    /// Copies the current binary to `<name>.backup`. Best-effort: failures are
    /// logged and `None` is returned.
    pub fn backup_existing(&self, binary: &str) -> Option<PathBuf> {
        let current = self.install_path(binary);
        if !current.is_file() {
            return None;
        }
        let backup = self.backup_path(binary);
        match fs::copy(&current, &backup) {
            Ok(_) => {
                debug!(backup = %backup.display(), "backed up previous binary");
                Some(backup)
            }
            Err(e) => {
                warn!(path = %current.display(), error = %e, "could not back up previous binary");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::util::is_executable;

    #[test]
    fn test_install_with_writes_and_marks_executable() {
        let dir = tempdir().unwrap();
        let installer = Installer::new(dir.path().join("bin"));
        let installed = installer
            .install_with("chaind", false, |f| {
                f.write_all(b"binary").map_err(|e| AcquireError::io("write", e))
            })
            .unwrap();
        assert_eq!(installed.path, dir.path().join("bin").join("chaind"));
        assert_eq!(fs::read(&installed.path).unwrap(), b"binary");
        assert!(is_executable(&installed.path) || cfg!(windows));
    }

    #[test]
    fn test_failed_write_leaves_existing_binary_and_no_temp_files() {
        let dir = tempdir().unwrap();
        let installer = Installer::new(dir.path());
        fs::write(installer.install_path("chaind"), b"old").unwrap();

        let result = installer.install_with("chaind", true, |f| {
            f.write_all(b"partial").map_err(|e| AcquireError::io("write", e))?;
            Err(AcquireError::Archive("truncated".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(installer.install_path("chaind")).unwrap(), b"old");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_backup_kept_when_enabled() {
        let dir = tempdir().unwrap();
        let installer = Installer::new(dir.path());
        fs::write(installer.install_path("chaind"), b"v1").unwrap();
        let src = dir.path().join("built");
        fs::write(&src, b"v2").unwrap();

        installer.install_file("chaind", &src, true).unwrap();
        assert_eq!(fs::read(installer.install_path("chaind")).unwrap(), b"v2");
        assert_eq!(fs::read(installer.backup_path("chaind")).unwrap(), b"v1");
    }

    #[test]
    fn test_no_backup_when_disabled() {
        let dir = tempdir().unwrap();
        let installer = Installer::new(dir.path());
        fs::write(installer.install_path("chaind"), b"v1").unwrap();
        let src = dir.path().join("built");
        fs::write(&src, b"v2").unwrap();

        installer.install_file("chaind", &src, false).unwrap();
        assert!(!installer.backup_path("chaind").exists());
    }

    #[test]
    fn test_backup_of_missing_binary_is_none() {
        let dir = tempdir().unwrap();
        assert!(Installer::new(dir.path()).backup_existing("nothing").is_none());
    }
}
