use std::path::PathBuf;

use serde::Deserialize;

use stash_client::Credentials;

/// Backend configuration, supplied by the surrounding service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the artifact store.
    pub store_url: String,
    /// Credentials for the artifact store and its PyPI proxy.
    pub store_credentials: Credentials,
    /// URL of the PyPI proxy repository in the store.
    pub pypi_proxy_url: String,
    /// The long-lived raw repository that caches VCS and URL artifacts
    /// across requests.
    pub raw_cache_repo: String,
    /// Prefix for per-request repository names.
    pub request_repo_prefix: String,
    /// Root directory holding the per-request bundle trees.
    pub bundles_dir: PathBuf,
    /// How many requirements to fetch concurrently within one request.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    5
}

/// The enclosing build-cache job; the unit of isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Request {
    pub id: u64,
}
