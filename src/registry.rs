use std::collections::HashMap;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use crate::error::{AcquireError, Result};
use crate::platform::PlatformInfo;
use crate::util::parse_github_repo;

/// Raw files of the Cosmos chain registry.
pub const CHAIN_REGISTRY_BASE: &str = "https://raw.githubusercontent.com/cosmos/chain-registry/master";

/// What the registry says about a chain's daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryHint {
    pub chain: String,
    /// Executable name, e.g. `osmosisd`.
    pub daemon_name: Option<String>,
    pub git_repo: Option<String>,
    /// GitHub owner parsed from `git_repo`.
    pub owner: Option<String>,
    /// GitHub repository parsed from `git_repo`.
    pub repo: Option<String>,
    pub recommended_version: Option<String>,
    /// Prebuilt binary for the host platform, if the registry lists one.
    pub binary_url: Option<String>,
}

/// The parts of a registry `chain.json` the engine uses.
#[derive(Debug, Deserialize)]
struct ChainJson {
    chain_name: String,
    daemon_name: Option<String>,
    codebase: Option<Codebase>,
}

#[derive(Debug, Deserialize)]
struct Codebase {
    git_repo: Option<String>,
    recommended_version: Option<String>,
    #[serde(default)]
    binaries: HashMap<String, String>,
}

/// Source of chain metadata.
pub trait RegistrySource {
    fn lookup(&mut self, chain: &str) -> Result<RegistryHint>;

    /// Forgets cached metadata so the next lookup goes upstream.
    fn clear(&mut self) {}
}

/// HTTP client for the chain registry with an explicit per-chain cache.
#[derive(Debug)]
pub struct ChainRegistryClient {
    http: Client,
    base: String,
    platform: PlatformInfo,
    cache: HashMap<String, RegistryHint>,
}

impl ChainRegistryClient {
    pub fn new(http: Client, base: impl Into<String>, platform: PlatformInfo) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            platform,
            cache: HashMap::new(),
        }
    }

    fn fetch(&self, chain: &str) -> Result<RegistryHint> {
        let url = format!("{}/{}/chain.json", self.base, chain);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| AcquireError::network(&url, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(AcquireError::NotFound { url }),
            status if !status.is_success() => {
                return Err(AcquireError::network(&url, format!("HTTP {status}")));
            }
            _ => {}
        }
        let body = response.text().map_err(|e| AcquireError::network(&url, e))?;
        let parsed: ChainJson = serde_json::from_str(&body)
            .map_err(|e| AcquireError::network(&url, format!("invalid chain.json: {e}")))?;
        Ok(hint_from_chain_json(parsed, &self.platform))
    }
}

impl RegistrySource for ChainRegistryClient {
    fn lookup(&mut self, chain: &str) -> Result<RegistryHint> {
        if let Some(hint) = self.cache.get(chain) {
            debug!(%chain, "registry cache hit");
            return Ok(hint.clone());
        }
        let hint = self.fetch(chain)?;
        self.cache.insert(chain.to_string(), hint.clone());
        Ok(hint)
    }

    fn clear(&mut self) {
        self.cache.clear();
    }
}

fn hint_from_chain_json(chain: ChainJson, platform: &PlatformInfo) -> RegistryHint {
    let mut hint = RegistryHint {
        chain: chain.chain_name,
        daemon_name: chain.daemon_name,
        ..Default::default()
    };
    if let Some(codebase) = chain.codebase {
        if let Some((owner, repo)) = codebase.git_repo.as_deref().and_then(parse_github_repo) {
            hint.owner = Some(owner);
            hint.repo = Some(repo);
        }
        hint.git_repo = codebase.git_repo;
        hint.recommended_version = codebase.recommended_version;
        hint.binary_url = codebase.binaries.get(&platform.registry_key()).cloned();
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSMOSIS: &str = r#"{
        "chain_name": "osmosis",
        "daemon_name": "osmosisd",
        "codebase": {
            "git_repo": "https://github.com/osmosis-labs/osmosis",
            "recommended_version": "v25.0.0",
            "binaries": {
                "linux/amd64": "https://github.com/osmosis-labs/osmosis/releases/download/v25.0.0/osmosisd-25.0.0-linux-amd64",
                "darwin/arm64": "https://example.com/osmosisd-darwin-arm64"
            }
        }
    }"#;

    #[test]
    fn test_hint_from_chain_json() {
        let parsed: ChainJson = serde_json::from_str(OSMOSIS).unwrap();
        let hint = hint_from_chain_json(parsed, &PlatformInfo::new("linux", "amd64"));
        assert_eq!(hint.daemon_name.as_deref(), Some("osmosisd"));
        assert_eq!(hint.owner.as_deref(), Some("osmosis-labs"));
        assert_eq!(hint.repo.as_deref(), Some("osmosis"));
        assert_eq!(hint.recommended_version.as_deref(), Some("v25.0.0"));
        assert!(hint.binary_url.unwrap().ends_with("linux-amd64"));
    }

    #[test]
    fn test_missing_platform_binary() {
        let parsed: ChainJson = serde_json::from_str(OSMOSIS).unwrap();
        let hint = hint_from_chain_json(parsed, &PlatformInfo::new("windows", "amd64"));
        assert!(hint.binary_url.is_none());
        assert!(hint.git_repo.is_some());
    }

    #[test]
    fn test_chain_without_codebase() {
        let parsed: ChainJson = serde_json::from_str(r#"{"chain_name": "bare"}"#).unwrap();
        let hint = hint_from_chain_json(parsed, &PlatformInfo::new("linux", "amd64"));
        assert_eq!(hint.chain, "bare");
        assert!(hint.git_repo.is_none());
    }

    mod mock_tests {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test(flavor = "multi_thread")]
        async fn test_lookup_is_cached_until_cleared() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/osmosis/chain.json"))
                .respond_with(ResponseTemplate::new(200).set_body_string(OSMOSIS))
                .expect(2)
                .mount(&server)
                .await;

            let uri = server.uri();
            tokio::task::spawn_blocking(move || {
                let mut client =
                    ChainRegistryClient::new(Client::new(), uri, PlatformInfo::new("linux", "amd64"));
                let first = client.lookup("osmosis").unwrap();
                let second = client.lookup("osmosis").unwrap();
                assert_eq!(first, second);
                client.clear();
                client.lookup("osmosis").unwrap();
            })
            .await
            .unwrap();
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_unknown_chain_is_not_found() {
            let server = MockServer::start().await;
            let uri = server.uri();
            let err = tokio::task::spawn_blocking(move || {
                let mut client =
                    ChainRegistryClient::new(Client::new(), uri, PlatformInfo::new("linux", "amd64"));
                client.lookup("nope")
            })
            .await
            .unwrap()
            .unwrap_err();
            assert!(matches!(err, AcquireError::NotFound { .. }));
        }
    }
}
