//! Building daemons from a git checkout.
//!
//! Each build runs in a throwaway directory: shallow clone, run the build
//! step with a Go-aware environment, locate the artifact and install it.
//! Go version problems in the build output are turned into an error that
//! says what to do about them.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};
use crate::config::{AcquisitionTarget, BuildStep, SourceBuild};
use crate::error::{AcquireError, Result};
use crate::finder::BinaryFinder;
use crate::install::{InstalledBinary, Installer};
use crate::process::{display_command, run_captured, CancelToken, CommandOutput};
use crate::toolchain::{
    extract_required_version, installation_instructions, is_version_incompatibility, GoVersionManager,
    ToolchainIncompatibility,
};

/// Set for `make` builds when Go version checks are bypassed. Several chains'
/// Makefiles skip their own `go version` guard when it is present.
pub const SKIP_GO_VERSION_CHECK_VAR: &str = "SKIP_GO_VERSION_CHECK";

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Environment a build step runs with, on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub vars: BTreeMap<String, OsString>,
}

/// Clones repositories and runs their builds.
#[derive(Debug, Clone)]
pub struct SourceCompiler {
    toolchain: GoVersionManager,
    finder: BinaryFinder,
    installer: Installer,
    cancel: CancelToken,
    build_timeout: Duration,
}

impl SourceCompiler {
    pub fn new(
        toolchain: GoVersionManager,
        finder: BinaryFinder,
        installer: Installer,
        cancel: CancelToken,
        build_timeout: Duration,
    ) -> Self {
        Self {
            toolchain,
            finder,
            installer,
            cancel,
            build_timeout,
        }
    }

    /// Builds the target from its configured repository.
    ///
    /// The existing binary is not backed up here; the caller does that before
    /// invoking a build.
    pub fn compile_from_source(&self, target: &AcquisitionTarget) -> Result<InstalledBinary> {
        let build = target
            .build
            .as_ref()
            .ok_or_else(|| AcquireError::config(&target.name, "no source repository configured"))?;
        self.compile(&target.binary, build)
    }

    /// Clones `build.repo`, runs the build and installs `binary`.
    pub fn compile(&self, binary: &str, build: &SourceBuild) -> Result<InstalledBinary> {
        let workdir = tempfile::Builder::new()
            .prefix("nodefetch-build-")
            .tempdir()
            .map_err(|e| AcquireError::io("creating build directory", e))?;
        let checkout = workdir.path().join("src");
        self.clone_repo(&build.repo, build.reference.as_deref(), &checkout)?;

        let step = if build.ignore_go_version {
            let bypass = bypass_build_step(&checkout, &build.build_target, &build.step);
            warn!(repo = %build.repo, step = %bypass, "Go version checks bypassed");
            bypass
        } else {
            build.step.clone()
        };

        let env = self.build_environment();
        let mut cmd = Command::new(&step.command);
        cmd.args(&step.args).current_dir(&checkout);
        for (key, value) in &env.vars {
            cmd.env(key, value);
        }
        for (key, value) in &step.env {
            cmd.env(key, value);
        }

        info!(repo = %build.repo, reference = ?build.reference, step = %step, "building from source");
        let out = run_captured(cmd, &self.cancel, Some(self.build_timeout))?;
        if !out.success() {
            return Err(self.diagnose_failure(&step, build.ignore_go_version, &out));
        }

        let found = self.finder.find_built_binary(&checkout, binary)?;
        info!(path = %found.path.display(), via = ?found.via, "located build artifact");
        self.installer.install_file(binary, &found.path, false)
    }

    fn clone_repo(&self, repo: &str, reference: Option<&str>, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth", "1"]);
        if let Some(reference) = reference {
            cmd.args(["--branch", reference]);
        }
        cmd.arg(repo).arg(dest).env("GIT_TERMINAL_PROMPT", "0");

        let label = display_command(&cmd);
        info!(%repo, ?reference, "cloning");
        let out = run_captured(cmd, &self.cancel, Some(CLONE_TIMEOUT))?;
        if !out.success() {
            return Err(AcquireError::Command {
                command: label,
                message: format!("{}: {}", out.describe_status(), out.output.trim()),
            });
        }
        Ok(())
    }

    /// Prepends the located Go toolchain's directory to `PATH` and passes
    /// `GOPATH`/`GOROOT` through when they are set.
    pub fn build_environment(&self) -> BuildEnvironment {
        let mut vars = BTreeMap::new();
        let mut paths: Vec<PathBuf> = Vec::new();
        match self.toolchain.go_binary().and_then(Path::parent) {
            Some(dir) => paths.push(dir.to_path_buf()),
            None => warn!("no Go toolchain found; building with the inherited PATH"),
        }
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        if let Ok(joined) = std::env::join_paths(paths) {
            vars.insert("PATH".to_string(), joined);
        }
        for key in ["GOPATH", "GOROOT"] {
            if let Some(value) = std::env::var_os(key).filter(|v| !v.is_empty()) {
                vars.insert(key.to_string(), value);
            }
        }
        BuildEnvironment { vars }
    }

    /// Classifies a failed build.
    ///
    /// Only the output is inspected, never the exit code.
    pub fn diagnose_failure(&self, step: &BuildStep, ignore_go_version: bool, out: &CommandOutput) -> AcquireError {
        self.diagnose_output(step, ignore_go_version, &out.describe_status(), &out.output)
    }

    fn diagnose_output(&self, step: &BuildStep, ignore_go_version: bool, status: &str, output: &str) -> AcquireError {
        if !is_version_incompatibility(output) {
            return AcquireError::Build {
                command: step.to_string(),
                status: status.to_string(),
                output: output.to_string(),
            };
        }
        if ignore_go_version {
            return AcquireError::BypassFailed {
                output: output.to_string(),
            };
        }

        let required = extract_required_version(output);
        let current = self.toolchain.current_version().ok().map(|info| info.version);
        let suggestion = match required {
            Some(required) => match self.toolchain.find_compatible_installation(&required) {
                Ok(found) => format!(
                    "A compatible Go {} is installed at {}; put {} first in PATH",
                    found.version,
                    found.path.display(),
                    found.path.parent().unwrap_or(found.path.as_path()).display()
                ),
                Err(_) => installation_instructions(&required),
            },
            None => "Install the Go version required by the project's go.mod".to_string(),
        };
        AcquireError::Toolchain(Box::new(ToolchainIncompatibility {
            required,
            current,
            suggestion,
            output: output.to_string(),
        }))
    }
}

/// Build step used when Go version checks are bypassed.
///
/// Preference order: build `./cmd/<target>` directly with `go build`; keep a
/// `make` step but set [`SKIP_GO_VERSION_CHECK_VAR`]; build every package.
pub fn bypass_build_step(checkout: &Path, build_target: &str, configured: &BuildStep) -> BuildStep {
    if checkout.join("cmd").join(build_target).is_dir() {
        return BuildStep {
            command: "go".to_string(),
            args: vec![
                "build".to_string(),
                "-o".to_string(),
                format!("build/{build_target}"),
                format!("./cmd/{build_target}"),
            ],
            env: BTreeMap::new(),
        };
    }
    if configured.command == "make" {
        let mut step = configured.clone();
        step.env.insert(SKIP_GO_VERSION_CHECK_VAR.to_string(), "1".to_string());
        return step;
    }
    BuildStep {
        command: "go".to_string(),
        args: vec!["build".to_string(), "-o".to_string(), "build/".to_string(), "./...".to_string()],
        env: BTreeMap::new(),
    }
}
