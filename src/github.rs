//! GitHub releases: fetching release metadata and picking the asset that
//! fits the host platform.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};
use crate::error::{AcquireError, Result};
use crate::platform::PlatformInfo;
use crate::util::normalize_version;

/// Public GitHub REST API.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Asset name suffixes that are never the binary itself.
const NON_BINARY_SUFFIXES: &[&str] = &[
    ".sha256", ".sha256sum", ".sha512", ".md5", ".asc", ".sig", ".pem", ".sbom", ".txt", ".json",
];

/// A published release as returned by the releases API.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// Glob-style match used for asset patterns. Case-insensitive.
///
/// Without a `*` the candidate must equal the pattern. With wildcards, every
/// non-empty segment must appear in order, a leading segment must be a
/// prefix and a trailing segment must be a suffix.
pub fn matches_pattern(candidate: &str, pattern: &str) -> bool {
    let candidate = candidate.to_lowercase();
    let pattern = pattern.to_lowercase();
    if !pattern.contains('*') {
        return candidate == pattern;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut pos = 0;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            if !candidate.starts_with(segment) {
                return false;
            }
            pos = segment.len();
            continue;
        }
        match candidate[pos..].find(segment) {
            Some(offset) => pos += offset + segment.len(),
            None => return false,
        }
    }

    match segments.last() {
        Some(last) if !last.is_empty() => candidate.ends_with(last),
        _ => true,
    }
}

fn is_binary_candidate(name: &str) -> bool {
    let lower = name.to_lowercase();
    !NON_BINARY_SUFFIXES.iter().any(|s| lower.ends_with(s)) && !lower.contains("checksum")
}

/// Picks the release asset to download for `platform`.
///
/// Order of preference:
/// 1. an asset equal to a wildcard-free `pattern`,
/// 2. a pattern-matching asset whose name carries both an OS and an
///    architecture alias, the most specific architecture alias winning,
/// 3. the first pattern-matching asset regardless of platform,
/// 4. the first asset naming the OS, ignoring architecture.
pub fn find_asset_for_platform<'a>(
    release: &'a Release,
    pattern: &str,
    platform: &PlatformInfo,
) -> Result<&'a ReleaseAsset> {
    if release.assets.is_empty() {
        return Err(AcquireError::NoAssets {
            tag: release.tag_name.clone(),
        });
    }

    let mut pattern_matches = Vec::new();
    let mut best: Option<(usize, &ReleaseAsset)> = None;
    for asset in &release.assets {
        let name = asset.name.to_lowercase();
        if !pattern.is_empty() {
            if !matches_pattern(&name, pattern) {
                continue;
            }
            if !pattern.contains('*') {
                return Ok(asset);
            }
            pattern_matches.push(asset);
        }
        if !is_binary_candidate(&name) || !platform.matches_os(&name) {
            continue;
        }
        if let Some(rank) = platform.arch_rank(&name) {
            if best.is_none_or(|(current, _)| rank < current) {
                best = Some((rank, asset));
            }
        }
    }
    if let Some((_, asset)) = best {
        debug!(asset = %asset.name, "asset matches platform");
        return Ok(asset);
    }

    if let Some(asset) = pattern_matches.into_iter().find(|a| is_binary_candidate(&a.name)) {
        warn!(asset = %asset.name, %platform, "no platform-specific asset; using pattern match");
        return Ok(asset);
    }

    if let Some(asset) = release
        .assets
        .iter()
        .find(|a| is_binary_candidate(&a.name) && platform.matches_os(&a.name))
    {
        warn!(asset = %asset.name, %platform, "no exact platform asset; using OS-only match");
        return Ok(asset);
    }

    Err(AcquireError::PlatformMismatch {
        platform: platform.to_string(),
        available: release.assets.iter().map(|a| a.name.clone()).collect(),
    })
}

/// Client for the releases endpoints of the GitHub API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(http: Client, api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn latest_release(&self, owner: &str, repo: &str) -> Result<Release> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.api_base, owner, repo);
        self.get_release(&url)
    }

    pub fn release_by_tag(&self, owner: &str, repo: &str, tag: &str) -> Result<Release> {
        let url = format!("{}/repos/{}/{}/releases/tags/{}", self.api_base, owner, repo, tag);
        self.get_release(&url)
    }

    /// Fetches the latest release, or the release tagged `version_hint` when
    /// the hint names a different version.
    ///
    /// If the tagged release does not exist, the latest release is used.
    pub fn resolve_release(&self, owner: &str, repo: &str, version_hint: Option<&str>) -> Result<Release> {
        let latest = self.latest_release(owner, repo)?;
        let Some(hint) = version_hint.filter(|h| !h.trim().is_empty()) else {
            return Ok(latest);
        };
        if normalize_version(hint) == normalize_version(&latest.tag_name) {
            return Ok(latest);
        }

        let mut tags = vec![hint.trim().to_string()];
        if !hint.trim().starts_with('v') {
            tags.push(format!("v{}", hint.trim()));
        }
        for tag in &tags {
            match self.release_by_tag(owner, repo, tag) {
                Ok(release) => {
                    info!(%owner, %repo, tag = %release.tag_name, latest = %latest.tag_name, "using requested release");
                    return Ok(release);
                }
                Err(AcquireError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(%owner, %repo, requested = %hint, latest = %latest.tag_name, "requested release not found; falling back to latest");
        Ok(latest)
    }

    fn get_release(&self, url: &str) -> Result<Release> {
        let mut request = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().map_err(|e| AcquireError::network(url, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AcquireError::NotFound { url: url.to_string() }),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Err(AcquireError::network(
                url,
                "GitHub API rate limit exceeded; set github_token or GITHUB_TOKEN",
            )),
            status if !status.is_success() => Err(AcquireError::network(url, format!("HTTP {status}"))),
            _ => response
                .json::<Release>()
                .map_err(|e| AcquireError::network(url, format!("invalid release JSON: {e}"))),
        }
    }
}
