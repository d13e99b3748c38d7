//! # Nodefetch Core Library
//!
//! This crate contains the acquisition engine behind the `nodefetch` tool, which keeps blockchain node
//! daemon binaries installed and current on a host.
//!
//! For each configured target, `nodefetch` obtains an executable from a direct URL, the chain registry,
//! a GitHub release asset or, as a last resort, a source build, and installs it atomically into a binary
//! directory (`nodefetch.toml`, `installed.toml`).
//!
//! This library is built for the `nodefetch` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`config`] – Parsing and validation of `nodefetch.toml`
//! - [`manager`] – The fallback policy and the periodic re-check loop
//! - [`downloader`] – Downloading and unpacking prebuilt binaries
//! - [`github`] – GitHub release lookup and platform asset selection
//! - [`registry`] – Chain registry metadata with an explicit cache
//! - [`compiler`] – Clone-and-build from source with Go diagnostics
//! - [`toolchain`] – Go toolchain discovery and version compatibility
//! - [`finder`] – Locating build artifacts
//! - [`platform`] – Host OS/architecture and their naming aliases
//! - [`install`] – Atomic installation with optional backups
//! - [`state`] – Records of installed binaries (`installed.toml`)
//! - [`process`] – Cancellable subprocesses with captured output
//! - [`error`] – The error type shared by all of the above
//! - [`util`] – Versions, hashing and executable helpers
//! - [`global`] – Platform config and data directories

pub mod config;
pub mod error;
pub mod platform;
pub mod process;
pub mod util;
pub mod finder;
pub mod toolchain;
pub mod github;
pub mod install;
pub mod downloader;
pub mod compiler;
pub mod registry;
pub mod state;
pub mod manager;
pub mod global;

pub use config::*;
pub use error::{AcquireError, Result};
pub use manager::{AcquisitionManager, Outcome, TargetReport};
pub use platform::{current_platform, PlatformInfo};
pub use process::CancelToken;
