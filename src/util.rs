use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use regex::Regex;
use semver::Version;
use sha2::{Digest, Sha256};
use crate::process::{run_captured, CancelToken};

/// Strips a leading `v` and surrounding whitespace from a version string.
pub fn normalize_version(version: &str) -> &str {
    let version = version.trim();
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Compares two version strings, ignoring a leading `v`.
///
/// Versions that both parse as SemVer are compared semantically, anything
/// else falls back to a plain string comparison.
pub fn versions_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_version(a), normalize_version(b));
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Pulls the first version-looking token (`v1.2.3`, `25.0.0-rc1`) out of text.
pub fn extract_version(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"v?\d+\.\d+(?:\.\d+)?(?:-[0-9A-Za-z.\-]+)?").expect("valid version regex")
    });
    re.find(text).map(|m| m.as_str().to_string())
}

/// Asks an installed daemon for its version.
///
/// Tries `<binary> version` first (the Cosmos SDK convention), then
/// `<binary> --version`. Best-effort: any failure yields `None`.
pub fn detect_binary_version(path: &Path) -> Option<String> {
    for arg in ["version", "--version"] {
        let mut cmd = Command::new(path);
        cmd.arg(arg);
        let Ok(out) = run_captured(cmd, &CancelToken::new(), Some(Duration::from_secs(10))) else {
            continue;
        };
        if !out.success() {
            continue;
        }
        if let Some(version) = out.output.lines().find_map(extract_version) {
            return Some(version);
        }
    }
    None
}

/// Splits a GitHub URL (`https://github.com/owner/repo(.git)`) into owner and repo.
pub fn parse_github_repo(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim().trim_end_matches('/').trim_end_matches(".git");
    let rest = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() < 2 || parts[0].is_empty() || parts[1].is_empty() {
        return None;
    }
    Some((parts[0].to_string(), parts[1].to_string()))
}

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks if a given path is an executable file on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        let ext = ext.to_ascii_lowercase();
        path.is_file() && matches!(ext.as_str(), "exe" | "bat" | "cmd")
    } else {
        false
    }
}

/// Sets the executable bits (`0o755`) on Unix. No-op elsewhere.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)
}
#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_version_strips_prefix() {
        assert_eq!(normalize_version("v1.2.3"), "1.2.3");
        assert_eq!(normalize_version(" 1.2.3 "), "1.2.3");
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match("v25.0.0", "25.0.0"));
        assert!(!versions_match("v25.0.0", "v25.0.1"));
        assert!(versions_match("main", "main"));
        assert!(!versions_match("1.2", "1.3"));
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("osmosisd version v25.0.0").as_deref(), Some("v25.0.0"));
        assert_eq!(extract_version("19.2.0-rc1").as_deref(), Some("19.2.0-rc1"));
        assert_eq!(extract_version("no version here"), None);
    }

    #[test]
    fn test_parse_github_repo() {
        assert_eq!(
            parse_github_repo("https://github.com/osmosis-labs/osmosis.git"),
            Some(("osmosis-labs".to_string(), "osmosis".to_string()))
        );
        assert_eq!(
            parse_github_repo("git@github.com:cosmos/gaia"),
            Some(("cosmos".to_string(), "gaia".to_string()))
        );
        assert_eq!(parse_github_repo("https://gitlab.com/a/b"), None);
        assert_eq!(parse_github_repo("https://github.com/only"), None);
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        assert!(!is_executable(&path));
        make_executable(&path).unwrap();
        assert!(is_executable(&path));
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_binary_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fakechaind");
        std::fs::write(&path, "#!/bin/sh\necho v3.1.4\n").unwrap();
        make_executable(&path).unwrap();
        assert_eq!(detect_binary_version(&path).as_deref(), Some("v3.1.4"));
    }
}
