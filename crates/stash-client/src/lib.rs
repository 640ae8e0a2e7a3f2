//! HTTP plumbing for the fetch pipeline: a retrying client with basic-auth
//! and an escape hatch for trusted hosts, simple-index HTML parsing, and
//! checksum computation.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

pub use checksum::{compute_checksum, verify_any_checksum, Checksum, ChecksumAlgorithm};
pub use error::Error;
pub use html::{Anchor, SimpleIndexPage};
pub use index::{find_sdists, select_best_sdist, SdistCandidate};

mod checksum;
mod error;
mod html;
mod index;

/// Basic-auth credentials for the index proxy or the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A builder for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    retries: u32,
    timeout: Duration,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(60 * 5),
        }
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Client, Error> {
        let verified = reqwest::ClientBuilder::new()
            .user_agent("stash")
            .pool_max_idle_per_host(20)
            .timeout(self.timeout)
            .build()?;
        // Only ever used for hosts the manifest marked as trusted.
        let insecure = reqwest::ClientBuilder::new()
            .user_agent("stash")
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        let retries = self.retries;
        let with_retries = |client: reqwest::Client| {
            let retry_policy = reqwest_retry::policies::ExponentialBackoff::builder()
                .build_with_max_retries(retries);
            reqwest_middleware::ClientBuilder::new(client)
                .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(
                    retry_policy,
                ))
                .build()
        };

        Ok(Client {
            verified: with_retries(verified),
            insecure: with_retries(insecure),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP client with transient-error retries and a second connection pool
/// that skips TLS verification, for `--trusted-host` downloads.
#[derive(Debug, Clone)]
pub struct Client {
    verified: reqwest_middleware::ClientWithMiddleware,
    insecure: reqwest_middleware::ClientWithMiddleware,
}

impl Client {
    fn request(
        &self,
        url: &Url,
        auth: Option<&Credentials>,
        insecure: bool,
    ) -> reqwest_middleware::RequestBuilder {
        let client = if insecure { &self.insecure } else { &self.verified };
        let mut request = client.get(url.clone());
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        request
    }

    /// GET a URL and return the response body as text.
    pub async fn get_text(&self, url: &Url, auth: Option<&Credentials>) -> Result<String, Error> {
        let response = self
            .request(url, auth, false)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    /// Stream a file from a URL to `dest`.
    ///
    /// The body is written to a temporary file next to `dest` and persisted
    /// only once the download completes, so a cancelled or failed transfer
    /// never leaves a half-written artifact behind.
    pub async fn download(
        &self,
        url: &Url,
        dest: &Path,
        auth: Option<&Credentials>,
        insecure: bool,
    ) -> Result<(), Error> {
        debug!("Downloading {url} to {}", dest.display());
        let response = self
            .request(url, auth, insecure)
            .send()
            .await?
            .error_for_status()?;

        let dir = dest
            .parent()
            .ok_or_else(|| Error::InvalidDestination(dest.to_path_buf()))?;
        let temp = tempfile::NamedTempFile::new_in(dir)?;
        let mut file = tokio::fs::File::create(temp.path()).await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        temp.persist(dest).map_err(|err| Error::Io(err.error))?;
        Ok(())
    }
}
