//! Go toolchain discovery and version compatibility.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use regex::Regex;
use tracing::{debug, warn};
use crate::error::{AcquireError, Result};
use crate::process::{run_captured, CancelToken};
use crate::util::is_executable;

/// Substrings (lowercase) in build output that point at a Go version problem.
const INCOMPATIBILITY_KEYWORDS: &[&str] = &[
    "unsupported go version",
    "go.mod requires go",
    "requires go >=",
    "requires go version",
    "module requires go",
    "invalid go version",
    "go version mismatch",
    "please upgrade go",
    "please install go",
    "toolchain not available",
    "go: download go",
];

/// Conventional locations of a `go` executable, `~` expanded at runtime.
const GO_LOCATIONS: &[&str] = &[
    "/usr/local/go/bin/go",
    "/usr/lib/go/bin/go",
    "/usr/bin/go",
    "/usr/local/bin/go",
    "/opt/go/bin/go",
    "/opt/homebrew/bin/go",
    "/snap/bin/go",
    "~/go/bin/go",
    "~/.local/go/bin/go",
];

/// Glob patterns for side-by-side multi-version installs.
const GO_GLOBS: &[&str] = &[
    "/usr/local/go*/bin/go",
    "/usr/lib/go-*/bin/go",
    "/opt/go*/bin/go",
    "~/sdk/go*/bin/go",
    "~/.go/versions/*/bin/go",
    "~/.gvm/gos/go*/bin/go",
];

/// A Go release number, e.g. `1.21` or `1.22.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl GoVersion {
    pub fn new(major: u32, minor: u32, patch: Option<u32>) -> Self {
        Self { major, minor, patch }
    }

    /// Parses the first `major.minor[.patch]` found in `text`, which may be a
    /// `go version` banner (`go version go1.22.3 linux/amd64`) or a bare
    /// requirement (`1.21`).
    pub fn parse(text: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?:go)?(\d+)\.(\d+)(?:\.(\d+))?").expect("valid go version regex")
        });
        let caps = re.captures(text)?;
        Some(Self {
            major: caps.get(1)?.as_str().parse().ok()?,
            minor: caps.get(2)?.as_str().parse().ok()?,
            patch: caps.get(3).and_then(|m| m.as_str().parse().ok()),
        })
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

/// A Go installation found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: GoVersion,
    /// Path to the `go` executable.
    pub path: PathBuf,
    /// The raw `go version` banner.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    /// Newer major version. Accepted, but worth a warning.
    NewerMajor,
    Incompatible,
}

/// Same major and at least the required minor is compatible. A newer major is
/// accepted with a warning; most build scripts tolerate newer toolchains.
pub fn check_compatibility(current: &GoVersion, required: &GoVersion) -> Compatibility {
    if current.major > required.major {
        Compatibility::NewerMajor
    } else if current.major == required.major && current.minor >= required.minor {
        Compatibility::Compatible
    } else {
        Compatibility::Incompatible
    }
}

pub fn is_compatible(current: &GoVersion, required: &GoVersion) -> bool {
    match check_compatibility(current, required) {
        Compatibility::Compatible => true,
        Compatibility::NewerMajor => {
            warn!(%current, %required, "Go major version is newer than required; assuming compatible");
            true
        }
        Compatibility::Incompatible => false,
    }
}

/// Returns true if build output mentions a Go version problem.
pub fn is_version_incompatibility(output: &str) -> bool {
    let lower = output.to_lowercase();
    INCOMPATIBILITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Extracts the Go version a failed build asked for, if the output says.
pub fn extract_required_version(output: &str) -> Option<GoVersion> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?i)requires\s+go\s*(?:version\s*)?(?:>=\s*)?v?(\d+\.\d+(?:\.\d+)?)",
            r"(?i)go\s*(?:version\s*)?(?:>=|must be at least|at least)\s*v?(\d+\.\d+(?:\.\d+)?)",
            r"(?i)minimum\s+go\s+version\s*(?:is|:)?\s*v?(\d+\.\d+(?:\.\d+)?)",
            r"(?i)go\s*(\d+\.\d+(?:\.\d+)?)\s+or\s+(?:newer|later|higher)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid requirement regex"))
        .collect()
    });
    patterns
        .iter()
        .find_map(|re| re.captures(output))
        .and_then(|caps| caps.get(1))
        .and_then(|m| GoVersion::parse(m.as_str()))
}

/// Finds the `go` executable: `$PATH` first, then conventional locations.
pub fn locate_go() -> Option<PathBuf> {
    let exe = if cfg!(windows) { "go.exe" } else { "go" };
    if let Some(path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(exe);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    GO_LOCATIONS
        .iter()
        .map(|p| expand_home(p))
        .find(|p| is_executable(p))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => directories::BaseDirs::new()
            .map(|b| b.home_dir().join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Detects installed Go versions and looks for compatible alternates.
///
/// Nothing is ever installed automatically; when no compatible toolchain is
/// found the caller gets instructions instead.
#[derive(Debug, Clone)]
pub struct GoVersionManager {
    go: Option<PathBuf>,
    locations: Vec<PathBuf>,
    globs: Vec<String>,
}

impl Default for GoVersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GoVersionManager {
    pub fn new() -> Self {
        Self {
            go: locate_go(),
            locations: GO_LOCATIONS.iter().map(|p| expand_home(p)).collect(),
            globs: GO_GLOBS
                .iter()
                .map(|p| expand_home(p).to_string_lossy().to_string())
                .collect(),
        }
    }

    /// A manager with an explicit `go` and search set.
    pub fn with_search_paths(go: Option<PathBuf>, locations: Vec<PathBuf>, globs: Vec<String>) -> Self {
        Self { go, locations, globs }
    }

    /// The `go` executable builds run with, if one was found.
    pub fn go_binary(&self) -> Option<&Path> {
        self.go.as_deref()
    }

    /// Version of the default `go` toolchain.
    pub fn current_version(&self) -> Result<VersionInfo> {
        let go = self.go.as_deref().ok_or_else(|| AcquireError::Command {
            command: "go version".to_string(),
            message: "no Go toolchain found in PATH or standard locations".to_string(),
        })?;
        version_of(go)
    }

    /// First installation among the known locations and globs that satisfies
    /// `required`.
    pub fn find_compatible_installation(&self, required: &GoVersion) -> Result<VersionInfo> {
        for candidate in self.candidates().iter().filter(|p| is_executable(p)) {
            match version_of(candidate) {
                Ok(info) if is_compatible(&info.version, required) => return Ok(info),
                Ok(info) => debug!(path = %candidate.display(), version = %info.version, "incompatible Go"),
                Err(e) => debug!(path = %candidate.display(), error = %e, "unusable Go"),
            }
        }
        Err(AcquireError::Command {
            command: "go".to_string(),
            message: format!("no Go installation compatible with {required} found"),
        })
    }

    /// The default `go`, then known locations, then glob matches. Each path
    /// appears once, at its first position.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = self.go.iter().cloned().collect();
        candidates.extend(self.locations.iter().cloned());
        for pattern in &self.globs {
            match glob::glob(pattern) {
                Ok(paths) => candidates.extend(paths.filter_map(|p| p.ok())),
                Err(e) => debug!(%pattern, error = %e, "skipping invalid glob"),
            }
        }
        let mut seen = HashSet::new();
        candidates.retain(|p| seen.insert(p.clone()));
        candidates
    }
}

/// Runs `<go> version` and parses the banner.
pub fn version_of(go: &Path) -> Result<VersionInfo> {
    let mut cmd = Command::new(go);
    cmd.arg("version");
    let out = run_captured(cmd, &CancelToken::new(), Some(Duration::from_secs(15)))?;
    if !out.success() {
        return Err(AcquireError::Command {
            command: format!("{} version", go.display()),
            message: out.output.trim().to_string(),
        });
    }
    let raw = out.output.trim().to_string();
    let version = GoVersion::parse(&raw).ok_or_else(|| AcquireError::Command {
        command: format!("{} version", go.display()),
        message: format!("unrecognised version banner: {raw}"),
    })?;
    Ok(VersionInfo {
        version,
        path: go.to_path_buf(),
        raw,
    })
}

/// Manual steps for getting a specific Go release.
pub fn installation_instructions(required: &GoVersion) -> String {
    let release = match required.patch {
        Some(_) => required.to_string(),
        None => format!("{}.0", required),
    };
    format!(
        "Install Go {required} or newer:\n\
         \x20   go install golang.org/dl/go{release}@latest && go{release} download\n\
         \x20   or download it from https://go.dev/dl/ and prepend its bin directory to PATH"
    )
}

/// A build failure attributed to the Go toolchain, with remediation hints.
#[derive(Debug)]
pub struct ToolchainIncompatibility {
    pub required: Option<GoVersion>,
    pub current: Option<GoVersion>,
    /// Either a compatible local installation or install instructions.
    pub suggestion: String,
    /// Raw build output.
    pub output: String,
}

impl fmt::Display for ToolchainIncompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Go version incompatibility detected")?;
        match self.required {
            Some(required) => writeln!(f, "  required: go {required}")?,
            None => writeln!(f, "  required: unknown (see build output)")?,
        }
        match self.current {
            Some(current) => writeln!(f, "  current:  go {current}")?,
            None => writeln!(f, "  current:  not found")?,
        }
        writeln!(f, "\nSuggestions:")?;
        writeln!(f, "  1. {}", self.suggestion)?;
        writeln!(
            f,
            "  2. Set `ignore_go_version = true` in the target's [source] table to build with version checks bypassed"
        )?;
        write!(f, "\nBuild output:\n{}", self.output)
    }
}

impl std::error::Error for ToolchainIncompatibility {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_banner() {
        let v = GoVersion::parse("go version go1.22.3 linux/amd64").unwrap();
        assert_eq!(v, GoVersion::new(1, 22, Some(3)));
        let v = GoVersion::parse("go version go1.21 darwin/arm64").unwrap();
        assert_eq!(v, GoVersion::new(1, 21, None));
        assert_eq!(GoVersion::parse("1.20").unwrap().to_string(), "1.20");
        assert!(GoVersion::parse("no version").is_none());
    }

    #[test]
    fn test_compatibility_rules() {
        let req = GoVersion::new(1, 21, None);
        assert_eq!(check_compatibility(&GoVersion::new(1, 21, Some(0)), &req), Compatibility::Compatible);
        assert_eq!(check_compatibility(&GoVersion::new(1, 22, None), &req), Compatibility::Compatible);
        assert_eq!(check_compatibility(&GoVersion::new(1, 20, Some(9)), &req), Compatibility::Incompatible);
        assert_eq!(check_compatibility(&GoVersion::new(2, 0, None), &req), Compatibility::NewerMajor);
        assert!(is_compatible(&GoVersion::new(2, 0, None), &req));
        assert!(!is_compatible(&GoVersion::new(0, 99, None), &req));
    }

    #[test]
    fn test_detects_incompatibility_keywords() {
        assert!(is_version_incompatibility("error: unsupported Go version 1.19"));
        assert!(is_version_incompatibility("go: go.mod requires go >= 1.22 (running go 1.21.5)"));
        assert!(!is_version_incompatibility("undefined: foo.Bar"));
    }

    #[test]
    fn test_extract_required_version() {
        let out = "go: go.mod requires go >= 1.22.1 (running go 1.21.5; GOTOOLCHAIN=local)";
        assert_eq!(extract_required_version(out), Some(GoVersion::new(1, 22, Some(1))));
        let out = "ERROR: Go version must be at least 1.21";
        assert_eq!(extract_required_version(out), Some(GoVersion::new(1, 21, None)));
        assert_eq!(extract_required_version("make: *** [build] Error 1"), None);
    }

    #[test]
    fn test_no_toolchain() {
        let mgr = GoVersionManager::with_search_paths(None, vec![], vec![]);
        assert!(mgr.current_version().is_err());
        assert!(mgr.find_compatible_installation(&GoVersion::new(1, 21, None)).is_err());
    }

    #[test]
    fn test_candidates_are_unique() {
        let go = PathBuf::from("/usr/local/go/bin/go");
        let mgr = GoVersionManager::with_search_paths(
            Some(go.clone()),
            vec![PathBuf::from("/usr/lib/go/bin/go"), go.clone(), PathBuf::from("/usr/lib/go/bin/go")],
            vec![],
        );
        assert_eq!(mgr.candidates(), vec![go, PathBuf::from("/usr/lib/go/bin/go")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_finds_compatible_installation_via_glob() {
        use crate::util::make_executable;
        let root = tempfile::tempdir().unwrap();
        for (dir, banner) in [("go1.19", "go1.19.4"), ("go1.22", "go1.22.2")] {
            let bin = root.path().join(dir).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            let go = bin.join("go");
            std::fs::write(&go, format!("#!/bin/sh\necho go version {banner} linux/amd64\n")).unwrap();
            make_executable(&go).unwrap();
        }
        let pattern = format!("{}/go*/bin/go", root.path().display());
        let mgr = GoVersionManager::with_search_paths(None, vec![], vec![pattern]);
        let found = mgr.find_compatible_installation(&GoVersion::new(1, 21, None)).unwrap();
        assert_eq!(found.version, GoVersion::new(1, 22, Some(2)));
        assert!(found.path.starts_with(root.path().join("go1.22")));
    }

    #[test]
    fn test_incompatibility_message_is_actionable() {
        let err = ToolchainIncompatibility {
            required: Some(GoVersion::new(1, 22, None)),
            current: Some(GoVersion::new(1, 20, Some(1))),
            suggestion: installation_instructions(&GoVersion::new(1, 22, None)),
            output: "go.mod requires go >= 1.22".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("required: go 1.22"));
        assert!(msg.contains("current:  go 1.20.1"));
        assert!(msg.contains("ignore_go_version"));
        assert!(msg.contains("go.mod requires go >= 1.22"));
    }
}
