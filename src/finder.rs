//! Locating the artifact a source build produced.
//!
//! Build systems put their output in many places: `go install` drops it into
//! `$GOBIN`, Makefiles into `build/` or `bin/`, some projects into
//! `cmd/<name>/`. The search here is best-effort. It probes known layouts
//! first and falls back to scanning the whole checkout, and it reports which
//! of the two produced the result.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use crate::error::{AcquireError, Result};
use crate::util::is_executable;

/// How a binary was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoundVia {
    /// One of the conventional install or build-output locations.
    Convention,
    /// The recursive scan of the build root.
    HeuristicScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundBinary {
    pub path: PathBuf,
    pub via: FoundVia,
}

/// Searches install directories and build trees for a named executable.
#[derive(Debug, Clone)]
pub struct BinaryFinder {
    install_dirs: Vec<PathBuf>,
}

impl BinaryFinder {
    /// Uses the Go install directory from the environment: `$GOBIN`, else the
    /// first `$GOPATH` entry's `bin`, else `~/go/bin`.
    pub fn from_env() -> Self {
        let mut install_dirs = Vec::new();
        if let Some(gobin) = std::env::var_os("GOBIN").filter(|v| !v.is_empty()) {
            install_dirs.push(PathBuf::from(gobin));
        } else if let Some(gopath) = std::env::var_os("GOPATH").filter(|v| !v.is_empty()) {
            if let Some(first) = std::env::split_paths(&gopath).next() {
                install_dirs.push(first.join("bin"));
            }
        } else if let Some(base) = directories::BaseDirs::new() {
            install_dirs.push(base.home_dir().join("go").join("bin"));
        }
        Self { install_dirs }
    }

    /// Uses exactly the given install directories, ahead of the build tree.
    pub fn with_install_dirs(install_dirs: Vec<PathBuf>) -> Self {
        Self { install_dirs }
    }

    /// Candidate locations in priority order. Installed locations come before
    /// build outputs.
    pub fn candidates(&self, build_root: &Path, target: &str) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.install_dirs.clone();
        dirs.push(build_root.join("build"));
        dirs.push(build_root.join("bin"));
        dirs.push(build_root.to_path_buf());
        dirs.push(build_root.join("cmd").join(target));
        dirs.push(build_root.join("build").join("bin"));

        let mut candidates = Vec::new();
        for dir in dirs {
            candidates.push(dir.join(target));
            if cfg!(windows) {
                candidates.push(dir.join(format!("{target}.exe")));
            }
        }
        candidates
    }

    /// Finds the binary named `target` produced by a build under `build_root`.
    ///
    /// The first existing regular file among [`candidates`](Self::candidates)
    /// wins. Otherwise the build root is walked; only a file whose name is
    /// exactly `target` and which is executable is accepted. The error lists
    /// every path that was considered.
    pub fn find_built_binary(&self, build_root: &Path, target: &str) -> Result<FoundBinary> {
        let mut tried = Vec::new();
        for candidate in self.candidates(build_root, target) {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "found built binary by convention");
                return Ok(FoundBinary {
                    path: candidate,
                    via: FoundVia::Convention,
                });
            }
            tried.push(candidate);
        }

        let exe_name = format!("{target}.exe");
        let mut near_misses = Vec::new();
        let walker = WalkDir::new(build_root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.contains(target) {
                continue;
            }
            let path = entry.path();
            if (name == target || name == exe_name.as_str()) && is_executable(path) {
                debug!(path = %path.display(), "found built binary by scanning build root");
                return Ok(FoundBinary {
                    path: path.to_path_buf(),
                    via: FoundVia::HeuristicScan,
                });
            }
            near_misses.push(path.to_path_buf());
        }

        tried.push(build_root.join("**").join(target));
        tried.extend(near_misses);
        Err(AcquireError::BinaryNotFound {
            target: target.to_string(),
            tried,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use crate::util::make_executable;

    fn write_exe(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"\x7fELF").unwrap();
        make_executable(path).unwrap();
    }

    #[test]
    fn test_nested_build_bin() {
        let root = tempdir().unwrap();
        let expected = root.path().join("build").join("bin").join("mytarget");
        write_exe(&expected);

        let finder = BinaryFinder::with_install_dirs(vec![]);
        let found = finder.find_built_binary(root.path(), "mytarget").unwrap();
        assert_eq!(found.path, expected);
        assert_eq!(found.via, FoundVia::Convention);
    }

    #[test]
    fn test_install_dir_preferred_over_build_output() {
        let root = tempdir().unwrap();
        let gobin = tempdir().unwrap();
        write_exe(&root.path().join("build").join("gaiad"));
        write_exe(&gobin.path().join("gaiad"));

        let finder = BinaryFinder::with_install_dirs(vec![gobin.path().to_path_buf()]);
        let found = finder.find_built_binary(root.path(), "gaiad").unwrap();
        assert_eq!(found.path, gobin.path().join("gaiad"));
    }

    #[test]
    fn test_build_dir_before_repo_root() {
        let root = tempdir().unwrap();
        write_exe(&root.path().join("gaiad"));
        write_exe(&root.path().join("build").join("gaiad"));

        let finder = BinaryFinder::with_install_dirs(vec![]);
        let found = finder.find_built_binary(root.path(), "gaiad").unwrap();
        assert_eq!(found.path, root.path().join("build").join("gaiad"));
    }

    #[cfg(unix)]
    #[test]
    fn test_heuristic_scan_finds_unusual_layout() {
        let root = tempdir().unwrap();
        let deep = root.path().join("out").join("release").join("x").join("junod");
        write_exe(&deep);

        let finder = BinaryFinder::with_install_dirs(vec![]);
        let found = finder.find_built_binary(root.path(), "junod").unwrap();
        assert_eq!(found.path, deep);
        assert_eq!(found.via, FoundVia::HeuristicScan);
    }

    #[cfg(unix)]
    #[test]
    fn test_heuristic_scan_rejects_non_executable_and_partial_names() {
        let root = tempdir().unwrap();
        let dir = root.path().join("out");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("junod"), b"not executable").unwrap();
        write_exe(&dir.join("junod-helper"));

        let finder = BinaryFinder::with_install_dirs(vec![]);
        let err = finder.find_built_binary(root.path(), "junod").unwrap_err();
        match err {
            AcquireError::BinaryNotFound { tried, .. } => {
                assert!(tried.contains(&root.path().join("build").join("junod")));
                assert!(tried.contains(&dir.join("junod")));
                assert!(tried.contains(&dir.join("junod-helper")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_candidate_order() {
        let finder = BinaryFinder::with_install_dirs(vec![PathBuf::from("/gobin")]);
        let root = Path::new("/src");
        let candidates = finder.candidates(root, "app");
        assert_eq!(candidates[0], PathBuf::from("/gobin/app"));
        let last = candidates.last().unwrap();
        assert!(last.ends_with("build/bin/app") || last.ends_with("build/bin/app.exe"));
    }
}
