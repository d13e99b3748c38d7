use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Path to the config file
    #[clap(long, global = true, default_value = "nodefetch.toml")]
    pub(crate) config: PathBuf,
    /// Enable debug logging (overridden by `NODEFETCH_LOG`)
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: NodefetchCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum NodefetchCommand {
    /// Writes a starter `nodefetch.toml`
    Init {
        /// Overwrite an existing config
        #[clap(long)]
        force: bool,
    },
    /// Acquires missing or outdated binaries once. Defaults to all targets
    Acquire {
        /// Acquire one specific target
        #[clap(long)]
        name: Option<String>,
        /// Re-acquire even if the installed binary is current
        #[clap(long)]
        force: bool,
    },
    /// Re-checks all targets periodically until interrupted
    Watch,
    /// Lists targets with their installed binaries
    Status,
    /// Prints the detected platform and the names it matches in asset files
    Platform,
    /// Looks for a built executable under a directory
    Find {
        root: PathBuf,
        binary: String,
    },
}
