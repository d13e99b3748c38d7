//! Fetching prebuilt binaries: direct URLs and GitHub release assets.

use std::io::{self, Cursor, Read, Seek, Write};
use flate2::read::GzDecoder;
use reqwest::blocking::{Client, Response};
use tracing::{debug, info};
use crate::config::AcquisitionTarget;
use crate::error::{AcquireError, Result};
use crate::github::{find_asset_for_platform, GitHubClient};
use crate::install::{InstalledBinary, Installer};
use crate::platform::PlatformInfo;

/// How a download is turned into an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Raw,
}

impl ArchiveKind {
    /// Picks the extraction method from the URL's file suffix.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".zip") {
            ArchiveKind::Zip
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else {
            ArchiveKind::Raw
        }
    }
}

/// A binary obtained by download, with the release version if one is known.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub installed: InstalledBinary,
    pub version: Option<String>,
    pub source_url: String,
}

/// Downloads binaries over HTTP and installs them atomically.
#[derive(Debug, Clone)]
pub struct BinaryDownloader {
    http: Client,
    github: GitHubClient,
    platform: PlatformInfo,
    installer: Installer,
    backups: bool,
}

impl BinaryDownloader {
    pub fn new(
        http: Client,
        github: GitHubClient,
        platform: PlatformInfo,
        installer: Installer,
        backups: bool,
    ) -> Self {
        Self {
            http,
            github,
            platform,
            installer,
            backups,
        }
    }

    /// Downloads `url` and installs the executable it contains.
    ///
    /// `.zip` and `.tar.gz` archives are searched for an entry named after the
    /// target's executable; anything else is treated as the executable itself.
    pub fn download_from_url(&self, target: &AcquisitionTarget, url: &str) -> Result<Downloaded> {
        info!(target = %target.name, %url, "downloading binary");
        let mut response = self.get(url)?;
        let kind = ArchiveKind::from_url(url);
        let binary = target.binary.as_str();

        let installed = match kind {
            ArchiveKind::Raw => self.installer.install_with(binary, self.backups, |out| {
                response
                    .copy_to(out)
                    .map_err(|e| AcquireError::network(url, format!("reading body: {e}")))?;
                Ok(())
            })?,
            ArchiveKind::Zip | ArchiveKind::TarGz => {
                let bytes = response
                    .bytes()
                    .map_err(|e| AcquireError::network(url, format!("reading body: {e}")))?;
                self.installer.install_with(binary, self.backups, |out| {
                    let entry = match kind {
                        ArchiveKind::Zip => extract_from_zip(Cursor::new(&bytes[..]), binary, out)?,
                        _ => extract_from_tar_gz(Cursor::new(&bytes[..]), binary, out)?,
                    };
                    debug!(%entry, "extracted binary from archive");
                    Ok(())
                })?
            }
        };

        Ok(Downloaded {
            installed,
            version: None,
            source_url: url.to_string(),
        })
    }

    /// Resolves a GitHub release (latest, or `version_hint` if it names a
    /// different tag), picks the asset for this platform and installs it.
    pub fn download_latest_release(
        &self,
        target: &AcquisitionTarget,
        owner: &str,
        repo: &str,
        asset_pattern: &str,
        version_hint: Option<&str>,
    ) -> Result<Downloaded> {
        let release = self.github.resolve_release(owner, repo, version_hint)?;
        let asset = find_asset_for_platform(&release, asset_pattern, &self.platform)?;
        info!(
            target = %target.name,
            tag = %release.tag_name,
            asset = %asset.name,
            size = asset.size,
            "selected release asset"
        );
        let mut downloaded = self.download_from_url(target, &asset.download_url)?;
        downloaded.version = Some(release.tag_name.clone());
        Ok(downloaded)
    }

    fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| AcquireError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::network(url, format!("HTTP {status}")));
        }
        Ok(response)
    }
}

fn entry_matches(entry_name: &str, binary: &str) -> bool {
    entry_name.ends_with(binary) || entry_name.ends_with(&format!("{binary}.exe"))
}

/// Copies the first zip entry whose name ends with `binary` (or
/// `binary.exe`) into `out`. Returns the entry name.
pub fn extract_from_zip<R: Read + Seek, W: Write>(reader: R, binary: &str, out: &mut W) -> Result<String> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| AcquireError::Archive(format!("invalid zip: {e}")))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AcquireError::Archive(format!("zip entry {i}: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if entry_matches(&name, binary) {
            io::copy(&mut entry, out)
                .map_err(|e| AcquireError::Archive(format!("extracting {name}: {e}")))?;
            return Ok(name);
        }
    }
    Err(AcquireError::Archive(format!("no entry named '{binary}' in zip archive")))
}

/// Copies the first regular tar.gz entry whose path ends with `binary` (or
/// `binary.exe`) into `out`. Returns the entry path.
pub fn extract_from_tar_gz<R: Read, W: Write>(reader: R, binary: &str, out: &mut W) -> Result<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let entries = archive
        .entries()
        .map_err(|e| AcquireError::Archive(format!("invalid tar.gz: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| AcquireError::Archive(format!("tar entry: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| AcquireError::Archive(format!("tar path: {e}")))?
            .to_string_lossy()
            .to_string();
        if entry_matches(&name, binary) {
            io::copy(&mut entry, out)
                .map_err(|e| AcquireError::Archive(format!("extracting {name}: {e}")))?;
            return Ok(name);
        }
    }
    Err(AcquireError::Archive(format!("no entry named '{binary}' in tar.gz archive")))
}
