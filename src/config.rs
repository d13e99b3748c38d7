use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use crate::error::AcquireError;
use crate::github::GITHUB_API_BASE;
use crate::global::utils::get_default_binary_dir;
use crate::registry::CHAIN_REGISTRY_BASE;

/// Represents the contents of a `nodefetch.toml` file.
///
/// Global settings plus one `[[target]]` table per daemon binary to keep installed.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

/// Engine-wide settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Settings {
    /// Where binaries are installed. Defaults to the platform data directory.
    pub binary_dir: Option<PathBuf>,
    /// Seconds between re-checks in `watch` mode.
    pub check_interval_secs: u64,
    /// Replace installed binaries when upstream advertises a different version.
    pub updates_enabled: bool,
    /// Keep a `.backup` copy of the binary being replaced.
    pub backups_enabled: bool,
    pub http_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Token for the GitHub API. `GITHUB_TOKEN` is used when unset.
    pub github_token: Option<String>,
    pub github_api_base: String,
    pub registry_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            binary_dir: None,
            check_interval_secs: 3600,
            updates_enabled: true,
            backups_enabled: true,
            http_timeout_secs: 120,
            build_timeout_secs: 1800,
            github_token: None,
            github_api_base: GITHUB_API_BASE.to_string(),
            registry_base: CHAIN_REGISTRY_BASE.to_string(),
        }
    }
}

impl Settings {
    pub fn binary_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.binary_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_default_binary_dir(),
        }
    }

    pub fn github_token(&self) -> Option<String> {
        self.github_token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

/// One `[[target]]` entry as written by the user.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TargetConfig {
    /// Display name, e.g. `osmosis`.
    pub name: String,
    /// Executable filename. Defaults to `name`.
    pub binary: Option<String>,
    /// Chain-registry name used for metadata lookups.
    pub chain: Option<String>,
    pub source: Option<SourceConfig>,
}

/// Strategy names accepted in `source.type`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Url,
    Source,
    Registry,
    Github,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Url => "url",
            SourceType::Source => "source",
            SourceType::Registry => "registry",
            SourceType::Github => "github",
        };
        f.write_str(name)
    }
}

/// The `[target.source]` table.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SourceConfig {
    /// Pin a strategy. Unset means automatic fallback.
    #[serde(rename = "type")]
    pub kind: Option<SourceType>,
    /// Direct download URL.
    pub url: Option<String>,
    /// Git repository to build from.
    pub repo: Option<String>,
    /// Branch or tag to build.
    pub branch: Option<String>,
    /// GitHub owner for release lookups.
    pub owner: Option<String>,
    /// GitHub repository name for release lookups.
    pub github_repo: Option<String>,
    pub asset_pattern: Option<String>,
    /// Version to install instead of what upstream recommends.
    pub version: Option<String>,
    pub ignore_go_version: bool,
    pub build: Option<BuildStep>,
    /// Shell-style shorthand for `build`, e.g. `LEDGER_ENABLED=false make build`.
    pub build_command: Option<String>,
    /// Name of the `cmd/<name>` package and of the produced executable.
    pub build_target: Option<String>,
    /// Allow source builds as the last automatic fallback. Defaults to true.
    pub allow_compile_fallback: Option<bool>,
}

/// A build invocation: program, arguments and extra environment.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl BuildStep {
    /// `make install`, the common denominator of Cosmos SDK chains.
    pub fn make_install() -> Self {
        Self {
            command: "make".to_string(),
            args: vec!["install".to_string()],
            env: BTreeMap::new(),
        }
    }

    /// Splits a flat command line into a structured step. Leading `KEY=value`
    /// tokens become environment variables.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut env = BTreeMap::new();
        let mut tokens = command_line.split_whitespace().peekable();
        while let Some(token) = tokens.peek() {
            match token.split_once('=') {
                Some((key, value)) if is_env_key(key) => {
                    env.insert(key.to_string(), value.to_string());
                    tokens.next();
                }
                _ => break,
            }
        }
        let command = tokens.next()?.to_string();
        Some(Self {
            command,
            args: tokens.map(str::to_string).collect(),
            env,
        })
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// GitHub release coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubSource {
    pub owner: String,
    pub repo: String,
    pub asset_pattern: String,
}

/// Everything needed to build a binary from a git checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBuild {
    pub repo: String,
    /// Branch or tag; the remote's default branch when unset.
    pub reference: Option<String>,
    pub step: BuildStep,
    pub build_target: String,
    pub ignore_go_version: bool,
}

/// A validated target, immutable for the duration of a scan cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionTarget {
    pub name: String,
    /// Executable filename under the binary directory.
    pub binary: String,
    /// Pinned strategy; `None` means automatic fallback.
    pub explicit: Option<SourceType>,
    pub url: Option<String>,
    pub chain: Option<String>,
    pub github: Option<GitHubSource>,
    pub build: Option<SourceBuild>,
    pub version_override: Option<String>,
    pub allow_compile_fallback: bool,
}

impl TargetConfig {
    /// Validates the entry and resolves defaults.
    ///
    /// # Errors
    /// Returns [`AcquireError::Config`] when a pinned strategy lacks the fields
    /// it needs.
    pub fn resolve(&self) -> Result<AcquisitionTarget, AcquireError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AcquireError::config("<unnamed>", "target name must not be empty"));
        }
        let source = self.source.clone().unwrap_or_default();
        let binary = self
            .binary
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| name.to_string());
        if binary.contains('/') || binary.contains('\\') {
            return Err(AcquireError::config(name, format!("binary '{binary}' must be a file name, not a path")));
        }

        let github = match (&source.owner, &source.github_repo) {
            (Some(owner), Some(repo)) => Some(GitHubSource {
                owner: owner.clone(),
                repo: repo.clone(),
                asset_pattern: source.asset_pattern.clone().unwrap_or_default(),
            }),
            (None, None) => None,
            _ => return Err(AcquireError::config(name, "`owner` and `github_repo` must be set together")),
        };

        let step = match (&source.build, &source.build_command) {
            (Some(step), _) => step.clone(),
            (None, Some(line)) => BuildStep::parse(line)
                .ok_or_else(|| AcquireError::config(name, "`build_command` is empty"))?,
            (None, None) => BuildStep::make_install(),
        };
        let build = source.repo.as_ref().map(|repo| SourceBuild {
            repo: repo.clone(),
            reference: source.branch.clone(),
            step,
            build_target: source.build_target.clone().unwrap_or_else(|| binary.clone()),
            ignore_go_version: source.ignore_go_version,
        });

        let target = AcquisitionTarget {
            name: name.to_string(),
            binary,
            explicit: source.kind,
            url: source.url.clone().filter(|u| !u.trim().is_empty()),
            chain: self.chain.clone(),
            github,
            build,
            version_override: source.version.clone(),
            allow_compile_fallback: source.allow_compile_fallback.unwrap_or(true),
        };

        let missing = match target.explicit {
            Some(SourceType::Url) if target.url.is_none() => Some("source type 'url' requires `url`"),
            Some(SourceType::Source) if target.build.is_none() => Some("source type 'source' requires `repo`"),
            Some(SourceType::Github) if target.github.is_none() && target.chain.is_none() => {
                Some("source type 'github' requires `owner` and `github_repo` or a `chain`")
            }
            Some(SourceType::Registry) if target.chain.is_none() => Some("source type 'registry' requires `chain`"),
            _ => None,
        };
        if let Some(message) = missing {
            return Err(AcquireError::config(name, message));
        }
        Ok(target)
    }
}

impl Config {
    /// Loads a `Config` from a file path.
    ///
    /// # Errors
    /// Returns an error if the file can't be read or deserialized.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Saves the config to the given file path in pretty TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// A starter config with one registry-backed target.
    pub fn default_template() -> Config {
        Config {
            settings: Settings::default(),
            targets: vec![TargetConfig {
                name: "osmosis".to_string(),
                binary: Some("osmosisd".to_string()),
                chain: Some("osmosis".to_string()),
                source: None,
            }],
        }
    }

    /// Resolves every target, keeping per-target errors separate.
    pub fn resolve_targets(&self) -> Vec<Result<AcquisitionTarget, AcquireError>> {
        self.targets.iter().map(TargetConfig::resolve).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            [settings]
            binary_dir = "/opt/nodes/bin"
            check_interval_secs = 60
            updates_enabled = false

            [[target]]
            name = "osmosis"
            chain = "osmosis"

            [[target]]
            name = "juno"
            binary = "junod"
            [target.source]
            type = "source"
            repo = "https://github.com/CosmosContracts/juno"
            branch = "v22.0.0"
            build_command = "LEDGER_ENABLED=false make build"
            ignore_go_version = true
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.settings.check_interval_secs, 60);
        assert!(!config.settings.updates_enabled);
        assert!(config.settings.backups_enabled);
        assert_eq!(config.targets.len(), 2);

        let juno = config.targets[1].resolve().unwrap();
        assert_eq!(juno.explicit, Some(SourceType::Source));
        let build = juno.build.unwrap();
        assert_eq!(build.reference.as_deref(), Some("v22.0.0"));
        assert_eq!(build.step.command, "make");
        assert_eq!(build.step.args, vec!["build"]);
        assert_eq!(build.step.env.get("LEDGER_ENABLED").map(String::as_str), Some("false"));
        assert_eq!(build.build_target, "junod");
        assert!(build.ignore_go_version);
    }

    #[test]
    fn test_build_step_parse() {
        let step = BuildStep::parse("CGO_ENABLED=0 GOFLAGS=-mod=mod go build -o build/app ./cmd/app").unwrap();
        assert_eq!(step.command, "go");
        assert_eq!(step.args, vec!["build", "-o", "build/app", "./cmd/app"]);
        assert_eq!(step.env.len(), 2);
        assert_eq!(step.env["GOFLAGS"], "-mod=mod");
        assert!(BuildStep::parse("   ").is_none());
        assert!(BuildStep::parse("A=1").is_none());
    }

    #[test]
    fn test_build_step_parse_stops_at_first_command_token() {
        let step = BuildStep::parse("make VERSION=1 install").unwrap();
        assert_eq!(step.command, "make");
        assert_eq!(step.args, vec!["VERSION=1", "install"]);
        assert!(step.env.is_empty());
    }

    #[test]
    fn test_structured_build_step() {
        let text = r#"
            name = "gaia"
            [source]
            repo = "https://github.com/cosmos/gaia"
            [source.build]
            command = "make"
            args = ["install"]
            env = { LEDGER_ENABLED = "false" }
        "#;
        let target: TargetConfig = toml::from_str(text).unwrap();
        let resolved = target.resolve().unwrap();
        let build = resolved.build.unwrap();
        assert_eq!(build.step.to_string(), "LEDGER_ENABLED=false make install");
        assert_eq!(resolved.binary, "gaia");
    }

    #[test]
    fn test_explicit_type_requires_fields() {
        let cases = [
            (SourceType::Url, "url"),
            (SourceType::Source, "repo"),
            (SourceType::Registry, "chain"),
            (SourceType::Github, "owner"),
        ];
        for (kind, field) in cases {
            let target = TargetConfig {
                name: "x".to_string(),
                binary: None,
                chain: None,
                source: Some(SourceConfig {
                    kind: Some(kind),
                    ..Default::default()
                }),
            };
            let err = target.resolve().unwrap_err();
            assert!(matches!(err, AcquireError::Config { .. }));
            assert!(err.to_string().contains(field), "{kind}: {err}");
        }
    }

    #[test]
    fn test_half_github_coordinates_rejected() {
        let target = TargetConfig {
            name: "x".to_string(),
            binary: None,
            chain: None,
            source: Some(SourceConfig {
                owner: Some("acme".to_string()),
                ..Default::default()
            }),
        };
        assert!(target.resolve().is_err());
    }

    #[test]
    fn test_binary_must_be_file_name() {
        let target = TargetConfig {
            name: "x".to_string(),
            binary: Some("../evil".to_string()),
            chain: None,
            source: None,
        };
        assert!(target.resolve().is_err());
    }

    #[test]
    fn test_resolve_targets_keeps_errors_per_target() {
        let mut config = Config::default_template();
        config.targets.push(TargetConfig {
            name: "".to_string(),
            binary: None,
            chain: None,
            source: None,
        });
        let resolved = config.resolve_targets();
        assert!(resolved[0].is_ok());
        assert!(resolved[1].is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodefetch.toml");
        Config::default_template().save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.targets[0].name, "osmosis");
        assert_eq!(loaded.settings.check_interval_secs, 3600);
    }
}
