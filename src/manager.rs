//! Orchestration of all acquisition strategies.
//!
//! The [`AcquisitionManager`] owns every collaborator (HTTP client, registry
//! cache, downloader, compiler, install records) and processes targets one at
//! a time, once per tick. A target is resolved like this:
//!
//! 1. A direct `url` is used exclusively.
//! 2. An explicit `source.type` runs exactly that strategy, with no fallback.
//! 3. Otherwise the registry binary, a GitHub release and a source build are
//!    tried in that order until one succeeds.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use chrono::Utc;
use reqwest::blocking::Client;
use tracing::{debug, error, info, warn};
use crate::compiler::SourceCompiler;
use crate::config::{AcquisitionTarget, BuildStep, Config, GitHubSource, Settings, SourceBuild, SourceType};
use crate::downloader::BinaryDownloader;
use crate::error::{AcquireError, Result};
use crate::finder::BinaryFinder;
use crate::github::GitHubClient;
use crate::install::{InstalledBinary, Installer};
use crate::platform::current_platform;
use crate::process::CancelToken;
use crate::registry::{ChainRegistryClient, RegistryHint, RegistrySource};
use crate::state::{InstallState, ResolvedBinary, STATE_FILE};
use crate::toolchain::GoVersionManager;
use crate::util::{detect_binary_version, versions_match};

/// What happened to a target during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The installed binary already matches upstream; nothing was written.
    UpToDate { version: String },
    Installed(ResolvedBinary),
    /// The binary exists and was left alone.
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct TargetReport {
    pub name: String,
    pub result: Result<Outcome>,
}

/// A binary produced by one strategy, before it is recorded.
struct Acquired {
    installed: InstalledBinary,
    version: Option<String>,
    strategy: SourceType,
}

pub struct AcquisitionManager {
    settings: Settings,
    targets: Vec<AcquisitionTarget>,
    /// Targets whose configuration did not validate: `(name, message)`.
    invalid: Vec<(String, String)>,
    github: GitHubClient,
    downloader: BinaryDownloader,
    compiler: SourceCompiler,
    registry: Box<dyn RegistrySource>,
    installer: Installer,
    state: InstallState,
    state_path: PathBuf,
    cancel: CancelToken,
}

impl AcquisitionManager {
    /// Builds a manager backed by the public chain registry.
    pub fn new(config: &Config, cancel: CancelToken) -> anyhow::Result<Self> {
        let http = build_http_client(&config.settings)?;
        let registry = ChainRegistryClient::new(
            http.clone(),
            config.settings.registry_base.clone(),
            current_platform().clone(),
        );
        Self::with_registry(config, cancel, http, Box::new(registry))
    }

    /// Builds a manager with a caller-supplied registry source.
    pub fn with_registry(
        config: &Config,
        cancel: CancelToken,
        http: Client,
        registry: Box<dyn RegistrySource>,
    ) -> anyhow::Result<Self> {
        let settings = config.settings.clone();
        let binary_dir = settings.binary_dir()?;
        let installer = Installer::new(&binary_dir);
        let github = GitHubClient::new(http.clone(), settings.github_api_base.clone(), settings.github_token());
        let downloader = BinaryDownloader::new(
            http,
            github.clone(),
            current_platform().clone(),
            installer.clone(),
            settings.backups_enabled,
        );
        let compiler = SourceCompiler::new(
            GoVersionManager::new(),
            BinaryFinder::from_env(),
            installer.clone(),
            cancel.clone(),
            settings.build_timeout(),
        );

        let mut targets = Vec::new();
        let mut invalid = Vec::new();
        for (entry, resolved) in config.targets.iter().zip(config.resolve_targets()) {
            match resolved {
                Ok(target) => targets.push(target),
                Err(e) => {
                    warn!(target = %entry.name, error = %e, "invalid target configuration");
                    invalid.push((entry.name.clone(), e.to_string()));
                }
            }
        }

        let state_path = binary_dir.join(STATE_FILE);
        let state = InstallState::load_or_default(&state_path);
        Ok(Self {
            settings,
            targets,
            invalid,
            github,
            downloader,
            compiler,
            registry,
            installer,
            state,
            state_path,
            cancel,
        })
    }

    pub fn targets(&self) -> &[AcquisitionTarget] {
        &self.targets
    }

    pub fn state(&self) -> &InstallState {
        &self.state
    }

    pub fn binary_dir(&self) -> &Path {
        self.installer.binary_dir()
    }

    /// True if a target of this name exists, valid or not.
    pub fn has_target(&self, name: &str) -> bool {
        self.targets.iter().any(|t| t.name == name) || self.invalid.iter().any(|(n, _)| n == name)
    }

    /// One pass over every target.
    pub fn tick(&mut self) -> Vec<TargetReport> {
        self.acquire_all(false, None)
    }

    /// One pass over all targets, or only the one called `only`.
    ///
    /// `force` re-acquires binaries even when they look current. Install
    /// records are saved once at the end of the pass.
    pub fn acquire_all(&mut self, force: bool, only: Option<&str>) -> Vec<TargetReport> {
        self.registry.clear();
        let mut reports = Vec::new();

        for (name, message) in &self.invalid {
            if only.is_none_or(|o| o == name.as_str()) {
                reports.push(TargetReport {
                    name: name.clone(),
                    result: Err(AcquireError::config(name, message)),
                });
            }
        }

        let targets: Vec<AcquisitionTarget> = self
            .targets
            .iter()
            .filter(|t| only.is_none_or(|o| o == t.name))
            .cloned()
            .collect();
        let mut changed = false;
        for target in &targets {
            if self.cancel.is_cancelled() {
                reports.push(TargetReport {
                    name: target.name.clone(),
                    result: Err(AcquireError::Cancelled),
                });
                continue;
            }
            let result = self.check_target(target, force);
            changed |= matches!(result, Ok(Outcome::Installed(_)));
            log_result(&target.name, &result);
            reports.push(TargetReport {
                name: target.name.clone(),
                result,
            });
        }

        if changed {
            if let Err(e) = self.state.save(&self.state_path) {
                error!(path = %self.state_path.display(), error = %e, "could not save install records");
            }
        }
        reports
    }

    /// Runs ticks every `check_interval` until cancelled.
    pub fn run(&mut self) {
        info!(
            targets = self.targets.len(),
            interval_secs = self.settings.check_interval().as_secs(),
            "starting acquisition loop"
        );
        loop {
            self.tick();
            if self.wait_for_next_tick() {
                break;
            }
        }
        info!("acquisition loop stopped");
    }

    /// Sleeps until the next tick is due. Returns true if cancelled meanwhile.
    fn wait_for_next_tick(&self) -> bool {
        let deadline = Instant::now() + self.settings.check_interval();
        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(500)));
        }
    }

    /// Acquires the target if missing, or if upstream moved on and updates
    /// are enabled.
    pub fn check_target(&mut self, target: &AcquisitionTarget, force: bool) -> Result<Outcome> {
        let path = self.installer.install_path(&target.binary);
        if force || !path.is_file() {
            if !force {
                info!(target = %target.name, path = %path.display(), "binary missing; acquiring");
            }
            return self.acquire(target).map(Outcome::Installed);
        }

        if !self.settings.updates_enabled {
            return Ok(Outcome::Skipped {
                reason: "updates disabled".to_string(),
            });
        }
        let Some(upstream) = self.upstream_version(target) else {
            return Ok(Outcome::Skipped {
                reason: "upstream version unknown".to_string(),
            });
        };
        let installed = detect_binary_version(&path)
            .or_else(|| self.state.get(&target.name).and_then(|r| r.version.clone()));
        match installed {
            Some(installed) if versions_match(&installed, &upstream) => {
                Ok(Outcome::UpToDate { version: installed })
            }
            installed => {
                info!(
                    target = %target.name,
                    installed = installed.as_deref().unwrap_or("unknown"),
                    %upstream,
                    "update available"
                );
                self.acquire(target).map(Outcome::Installed)
            }
        }
    }

    /// The version upstream currently advertises: the configured override,
    /// the registry's recommended version, or the latest GitHub tag.
    fn upstream_version(&mut self, target: &AcquisitionTarget) -> Option<String> {
        if let Some(version) = &target.version_override {
            return Some(version.clone());
        }
        let hint = self.lookup_hint(target);
        if let Some(version) = hint.as_ref().and_then(|h| h.recommended_version.clone()) {
            return Some(version);
        }
        let github = github_source(target, hint.as_ref())?;
        match self.github.latest_release(&github.owner, &github.repo) {
            Ok(release) => Some(release.tag_name),
            Err(e) => {
                debug!(target = %target.name, error = %e, "could not fetch latest release");
                None
            }
        }
    }

    fn lookup_hint(&mut self, target: &AcquisitionTarget) -> Option<RegistryHint> {
        let chain = target.chain.as_deref()?;
        match self.registry.lookup(chain) {
            Ok(hint) => Some(hint),
            Err(e) => {
                debug!(target = %target.name, %chain, error = %e, "registry lookup failed");
                None
            }
        }
    }

    /// Obtains and installs the target's binary, recording the result.
    pub fn acquire(&mut self, target: &AcquisitionTarget) -> Result<ResolvedBinary> {
        if self.cancel.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        let acquired = match (&target.url, target.explicit) {
            (Some(url), explicit) => {
                if explicit.is_some_and(|kind| kind != SourceType::Url) {
                    warn!(target = %target.name, "a direct url is configured; ignoring source type");
                }
                self.from_url(target, url, SourceType::Url, None)?
            }
            (None, Some(kind)) => self.explicit(target, kind)?,
            (None, None) => self.automatic(target)?,
        };
        Ok(self.record(target, acquired))
    }

    fn explicit(&mut self, target: &AcquisitionTarget, kind: SourceType) -> Result<Acquired> {
        debug!(target = %target.name, strategy = %kind, "using configured strategy");
        match kind {
            SourceType::Url => Err(AcquireError::config(&target.name, "source type 'url' requires `url`")),
            SourceType::Registry => {
                let chain = target
                    .chain
                    .as_deref()
                    .ok_or_else(|| AcquireError::config(&target.name, "source type 'registry' requires `chain`"))?;
                let hint = self.registry.lookup(chain)?;
                self.from_registry(target, &hint)
            }
            SourceType::Github => {
                let hint = match (&target.github, &target.chain) {
                    (None, Some(chain)) => Some(self.registry.lookup(chain)?),
                    _ => None,
                };
                let github = github_source(target, hint.as_ref()).ok_or_else(|| {
                    AcquireError::config(&target.name, "no GitHub repository known for source type 'github'")
                })?;
                self.from_github(target, &github, hint.as_ref())
            }
            SourceType::Source => self.from_source(target, None),
        }
    }

    /// Registry binary, then GitHub release, then source build.
    fn automatic(&mut self, target: &AcquisitionTarget) -> Result<Acquired> {
        let mut attempts: Vec<(SourceType, String)> = Vec::new();

        let hint = match target.chain.as_deref() {
            Some(chain) => match self.registry.lookup(chain) {
                Ok(hint) => Some(hint),
                Err(e) => {
                    warn!(target = %target.name, strategy = "registry", error = %e, "strategy failed");
                    attempts.push((SourceType::Registry, e.to_string()));
                    None
                }
            },
            None => None,
        };

        if let Some(hint) = &hint {
            match self.from_registry(target, hint) {
                Ok(acquired) => return Ok(acquired),
                Err(e) => fail(target, SourceType::Registry, e, &mut attempts)?,
            }
        }

        if let Some(github) = github_source(target, hint.as_ref()) {
            match self.from_github(target, &github, hint.as_ref()) {
                Ok(acquired) => return Ok(acquired),
                Err(e) => fail(target, SourceType::Github, e, &mut attempts)?,
            }
        }

        if let Some(build) = source_build(target, hint.as_ref()) {
            if target.allow_compile_fallback {
                warn!(target = %target.name, repo = %build.repo, "prebuilt binaries unavailable; compiling from source");
                let derived = target.build.is_none().then_some(&build);
                match self.from_source(target, derived) {
                    Ok(acquired) => return Ok(acquired),
                    Err(e) => fail(target, SourceType::Source, e, &mut attempts)?,
                }
            } else {
                attempts.push((
                    SourceType::Source,
                    "skipped: allow_compile_fallback = false".to_string(),
                ));
            }
        }

        if attempts.is_empty() {
            return Err(AcquireError::config(
                &target.name,
                "no acquisition method configured; set `chain`, `url`, `owner`/`github_repo` or `repo`",
            ));
        }
        Err(AcquireError::AllMethodsFailed {
            target: target.name.clone(),
            attempts,
        })
    }

    fn from_url(
        &self,
        target: &AcquisitionTarget,
        url: &str,
        strategy: SourceType,
        version: Option<String>,
    ) -> Result<Acquired> {
        let downloaded = self.downloader.download_from_url(target, url)?;
        Ok(Acquired {
            installed: downloaded.installed,
            version: downloaded.version.or(version),
            strategy,
        })
    }

    fn from_registry(&self, target: &AcquisitionTarget, hint: &RegistryHint) -> Result<Acquired> {
        let url = hint.binary_url.as_deref().ok_or_else(|| AcquireError::NoRegistryBinary {
            chain: hint.chain.clone(),
            platform: current_platform().to_string(),
        })?;
        self.from_url(target, url, SourceType::Registry, hint.recommended_version.clone())
    }

    fn from_github(
        &self,
        target: &AcquisitionTarget,
        github: &GitHubSource,
        hint: Option<&RegistryHint>,
    ) -> Result<Acquired> {
        let version_hint = target
            .version_override
            .as_deref()
            .or_else(|| hint.and_then(|h| h.recommended_version.as_deref()));
        let downloaded = self.downloader.download_latest_release(
            target,
            &github.owner,
            &github.repo,
            &github.asset_pattern,
            version_hint,
        )?;
        Ok(Acquired {
            installed: downloaded.installed,
            version: downloaded.version,
            strategy: SourceType::Github,
        })
    }

    /// Builds the target's own repository, or `derived` when the build
    /// settings came from the registry.
    fn from_source(&self, target: &AcquisitionTarget, derived: Option<&SourceBuild>) -> Result<Acquired> {
        if self.settings.backups_enabled {
            self.installer.backup_existing(&target.binary);
        }
        let (installed, reference) = match derived {
            Some(build) => (self.compiler.compile(&target.binary, build)?, build.reference.clone()),
            None => (
                self.compiler.compile_from_source(target)?,
                target.build.as_ref().and_then(|b| b.reference.clone()),
            ),
        };
        Ok(Acquired {
            installed,
            version: reference,
            strategy: SourceType::Source,
        })
    }

    fn record(&mut self, target: &AcquisitionTarget, acquired: Acquired) -> ResolvedBinary {
        let version = detect_binary_version(&acquired.installed.path).or(acquired.version);
        let record = ResolvedBinary {
            path: acquired.installed.path,
            version,
            installed_at: Utc::now(),
            sha256: acquired.installed.sha256,
            strategy: acquired.strategy,
        };
        info!(
            target = %target.name,
            strategy = %record.strategy,
            version = record.version.as_deref().unwrap_or("unknown"),
            "acquired binary"
        );
        self.state.record(&target.name, record.clone());
        record
    }
}

/// Records a failed strategy, or stops the chain if the run was cancelled.
fn fail(
    target: &AcquisitionTarget,
    strategy: SourceType,
    err: AcquireError,
    attempts: &mut Vec<(SourceType, String)>,
) -> Result<()> {
    if matches!(err, AcquireError::Cancelled) {
        return Err(err);
    }
    warn!(target = %target.name, %strategy, error = %err, "strategy failed");
    attempts.push((strategy, err.to_string()));
    Ok(())
}

/// GitHub coordinates from the target, else from the registry's git repo.
fn github_source(target: &AcquisitionTarget, hint: Option<&RegistryHint>) -> Option<GitHubSource> {
    if let Some(github) = &target.github {
        return Some(github.clone());
    }
    let hint = hint?;
    Some(GitHubSource {
        owner: hint.owner.clone()?,
        repo: hint.repo.clone()?,
        asset_pattern: String::new(),
    })
}

/// Build settings from the target, else `make install` of the registry's repo
/// at the recommended version.
fn source_build(target: &AcquisitionTarget, hint: Option<&RegistryHint>) -> Option<SourceBuild> {
    if let Some(build) = &target.build {
        return Some(build.clone());
    }
    let hint = hint?;
    Some(SourceBuild {
        repo: hint.git_repo.clone()?,
        reference: target
            .version_override
            .clone()
            .or_else(|| hint.recommended_version.clone()),
        step: BuildStep::make_install(),
        build_target: target.binary.clone(),
        ignore_go_version: false,
    })
}

fn log_result(name: &str, result: &Result<Outcome>) {
    match result {
        Ok(Outcome::Installed(_)) => {}
        Ok(Outcome::UpToDate { version }) => debug!(target = %name, %version, "up to date"),
        Ok(Outcome::Skipped { reason }) => debug!(target = %name, %reason, "skipped"),
        Err(e) if e.is_warning() => warn!(target = %name, error = %e, "acquisition failed"),
        Err(e) if e.is_transient() => warn!(target = %name, error = %e, "acquisition failed; retrying next tick"),
        Err(e) => error!(target = %name, error = %e, "acquisition failed"),
    }
}

/// The shared HTTP client: one per process, bounded per-request timeout.
pub fn build_http_client(settings: &Settings) -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("nodefetch/", env!("CARGO_PKG_VERSION")))
        .timeout(settings.http_timeout())
        .build()?;
    Ok(client)
}
