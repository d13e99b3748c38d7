use std::path::PathBuf;
use thiserror::Error;
use crate::config::SourceType;
use crate::toolchain::ToolchainIncompatibility;

/// Result alias used throughout the acquisition engine.
pub type Result<T> = std::result::Result<T, AcquireError>;

/// Everything that can go wrong while obtaining a daemon binary.
///
/// Variants follow the failure classes the manager cares about when deciding
/// whether to fall back to the next strategy: configuration problems, network
/// and API failures, platform mismatches, toolchain trouble and local I/O.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// A target is missing a field its source type requires.
    #[error("configuration error for '{target}': {message}")]
    Config {
        target: String,
        message: String,
    },

    /// Transport failure, non-2xx status or undecodable body.
    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        message: String,
    },

    /// The remote answered 404.
    #[error("{url} was not found (404)")]
    NotFound {
        url: String,
    },

    /// The release exists but carries no downloadable files at all.
    #[error("no binary assets in release {tag}; the project may not publish prebuilt binaries")]
    NoAssets {
        tag: String,
    },

    /// Assets exist but none fits the host platform.
    #[error("no release asset matches platform {platform}; available assets: {}", .available.join(", "))]
    PlatformMismatch {
        platform: String,
        available: Vec<String>,
    },

    /// The chain registry has no prebuilt binary for the host platform.
    #[error("chain registry lists no binary for '{chain}' on {platform}")]
    NoRegistryBinary {
        chain: String,
        platform: String,
    },

    #[error("archive error: {0}")]
    Archive(String),

    /// The build succeeded but its artifact could not be located.
    #[error("could not find built binary '{target}'; tried:\n{}", format_paths(.tried))]
    BinaryNotFound {
        target: String,
        tried: Vec<PathBuf>,
    },

    /// The build failed because of the Go toolchain version.
    #[error(transparent)]
    Toolchain(Box<ToolchainIncompatibility>),

    /// Version checks were bypassed and the build still failed.
    #[error("build failed even with Go version checks bypassed (ignore_go_version = true):\n{output}")]
    BypassFailed {
        output: String,
    },

    #[error("build command `{command}` failed ({status}):\n{output}")]
    Build {
        command: String,
        status: String,
        output: String,
    },

    /// An external command could not be run or exited unsuccessfully.
    #[error("`{command}` failed: {message}")]
    Command {
        command: String,
        message: String,
    },

    #[error("`{command}` timed out after {seconds} seconds")]
    Timeout {
        command: String,
        seconds: u64,
    },

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// Automatic mode ran out of strategies.
    #[error("all acquisition methods failed for '{target}':\n{}", format_attempts(.attempts))]
    AllMethodsFailed {
        target: String,
        attempts: Vec<(SourceType, String)>,
    },
}

impl AcquireError {
    pub fn config(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Network and API failures that may succeed on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::NotFound { .. } | Self::Timeout { .. }
        )
    }

    /// Failures that are reported as warnings rather than hard errors.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::BypassFailed { .. })
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_attempts(attempts: &[(SourceType, String)]) -> String {
    attempts
        .iter()
        .map(|(strategy, err)| format!("  [{strategy}] {err}"))
        .collect::<Vec<_>>()
        .join("\n")
}
