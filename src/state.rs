use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::config::SourceType;
use crate::error::{AcquireError, Result};

/// File name of the install records inside the binary directory.
pub const STATE_FILE: &str = "installed.toml";

/// Record of the last successful acquisition of a target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedBinary {
    pub path: PathBuf,
    /// Best-effort version string.
    pub version: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub sha256: String,
    pub strategy: SourceType,
}

/// Install records keyed by target name, persisted as `installed.toml`.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct InstallState {
    #[serde(default)]
    pub binary: BTreeMap<String, ResolvedBinary>,
}

impl InstallState {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return InstallState::default();
        }
        match fs::read_to_string(path).map(|content| toml::from_str(&content)) {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable install state");
                InstallState::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable install state");
                InstallState::default()
            }
        }
    }

    /// Writes the records through a temp file and rename.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| AcquireError::io(format!("creating {}", dir.display()), e))?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| AcquireError::io("serializing install state", std::io::Error::other(e)))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| AcquireError::io("creating temp state file", e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| AcquireError::io("writing install state", e))?;
        tmp.persist(path)
            .map_err(|e| AcquireError::io(format!("saving {}", path.display()), e.error))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedBinary> {
        self.binary.get(name)
    }

    /// Stores `record` for `name`, replacing any previous record.
    pub fn record(&mut self, name: &str, record: ResolvedBinary) {
        self.binary.insert(name.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(version: &str) -> ResolvedBinary {
        ResolvedBinary {
            path: PathBuf::from("/opt/bin/gaiad"),
            version: Some(version.to_string()),
            installed_at: Utc::now(),
            sha256: "ab".repeat(32),
            strategy: SourceType::Github,
        }
    }

    #[test]
    fn test_record_overwrites() {
        let mut state = InstallState::default();
        state.record("gaia", record("v1.0.0"));
        state.record("gaia", record("v2.0.0"));
        assert_eq!(state.binary.len(), 1);
        assert_eq!(state.get("gaia").unwrap().version.as_deref(), Some("v2.0.0"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        let mut state = InstallState::default();
        let original = record("v1.0.0");
        state.record("gaia", original.clone());
        state.save(&path).unwrap();

        let loaded = InstallState::load_or_default(&path);
        assert_eq!(loaded.get("gaia"), Some(&original));
    }

    #[test]
    fn test_corrupt_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        fs::write(&path, "not = [valid").unwrap();
        assert!(InstallState::load_or_default(&path).binary.is_empty());
    }
}
