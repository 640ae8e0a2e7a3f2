//! The per-requirement fetch pipeline: dispatch by kind, enforce integrity,
//! lay the artifact down in the bundle tree, and keep the shared raw cache
//! populated.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{debug, info};
use url::Url;

use stash_client::{
    find_sdists, select_best_sdist, verify_any_checksum, Checksum, Client, SimpleIndexPage,
};
use stash_filename::SdistExtension;
use stash_mirror::{ArtifactStore, Mirror};
use stash_normalize::{canonicalize_version, PackageName};
use stash_requirements::{
    process_options, validate_hashes, validate_requirements, Requirement, RequirementKind,
    RequirementsFile, HASH_QUALIFIER,
};

use crate::config::Config;
use crate::sdist::check_sdist_metadata;
use crate::vcs::{extract_git_info, GitFetcher, GitInfo};
use crate::Error;

/// A materialized requirement, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedDependency {
    Index {
        name: PackageName,
        /// The resolved version, canonicalized.
        version: String,
        path: PathBuf,
    },
    Vcs {
        name: PackageName,
        path: PathBuf,
        /// The clean fetch URL.
        url: String,
        /// The 40-hex git ref, lowercased.
        reference: String,
        host: String,
        namespace: String,
        repo: String,
        raw_component_name: String,
        /// Whether the artifact came from the raw cache instead of origin.
        already_mirrored: bool,
    },
    Url {
        name: PackageName,
        path: PathBuf,
        original_url: String,
        /// The original URL, with `cachito_hash` appended if it was missing.
        url_with_hash: String,
        raw_component_name: String,
        already_mirrored: bool,
    },
}

impl FetchedDependency {
    pub fn name(&self) -> &PackageName {
        match self {
            Self::Index { name, .. } | Self::Vcs { name, .. } | Self::Url { name, .. } => name,
        }
    }

    pub fn local_path(&self) -> &Path {
        match self {
            Self::Index { path, .. } | Self::Vcs { path, .. } | Self::Url { path, .. } => path,
        }
    }

    pub fn kind(&self) -> RequirementKind {
        match self {
            Self::Index { .. } => RequirementKind::Index,
            Self::Vcs { .. } => RequirementKind::Vcs,
            Self::Url { .. } => RequirementKind::Url,
        }
    }

    /// The version string reported for this dependency: the canonical
    /// version for index artifacts, `git+<url>@<ref>` for VCS artifacts, and
    /// the hash-qualified URL for URL artifacts.
    pub fn version_string(&self) -> String {
        match self {
            Self::Index { version, .. } => version.clone(),
            Self::Vcs { url, reference, .. } => format!("git+{url}@{reference}"),
            Self::Url { url_with_hash, .. } => url_with_hash.clone(),
        }
    }
}

/// Fetches all requirements of one manifest into the request's bundle tree.
pub(crate) struct Fetcher<'a, S, G> {
    pub(crate) config: &'a Config,
    pub(crate) client: &'a Client,
    pub(crate) mirror: &'a Mirror<S>,
    pub(crate) git: &'a G,
    pub(crate) pip_deps_dir: PathBuf,
}

impl<S: ArtifactStore, G: GitFetcher> Fetcher<'_, S, G> {
    /// Download sdists of all requirements in the manifest, in manifest
    /// order. Individual fetches run concurrently, bounded by the configured
    /// concurrency.
    pub(crate) async fn download_dependencies(
        &self,
        manifest: &RequirementsFile,
    ) -> Result<Vec<FetchedDependency>, Error> {
        let global = process_options(&manifest.options)?;

        let require_hashes = if global.require_hashes {
            info!("Global --require-hashes option used, will require hashes");
            true
        } else if manifest
            .requirements
            .iter()
            .any(|requirement| !requirement.hashes.is_empty())
        {
            info!("At least one dependency uses the --hash option, will require hashes");
            true
        } else {
            info!(
                "No hash options used, will not require hashes for non-HTTP(S) dependencies. \
                 HTTP(S) dependencies always require hashes (use the #cachito_hash URL qualifier)."
            );
            false
        };

        validate_requirements(&manifest.requirements)?;
        validate_hashes(&manifest.requirements, require_hashes)?;

        fs_err::tokio::create_dir_all(&self.pip_deps_dir).await?;

        let trusted_hosts: HashSet<&str> =
            global.trusted_hosts.iter().map(String::as_str).collect();

        stream::iter(
            manifest
                .requirements
                .iter()
                .map(|requirement| self.fetch_requirement(requirement, require_hashes, &trusted_hosts)),
        )
        .buffered(self.config.concurrency.max(1))
        .try_collect()
        .await
    }

    /// Fetch one requirement: dispatch by kind, verify integrity, and
    /// mirror freshly fetched VCS/URL artifacts into the shared raw cache.
    async fn fetch_requirement(
        &self,
        requirement: &Requirement,
        require_hashes: bool,
        trusted_hosts: &HashSet<&str>,
    ) -> Result<FetchedDependency, Error> {
        info!("Downloading {}", requirement.download_line);

        let fetched = match requirement.kind {
            RequirementKind::Index => {
                let fetched = self.fetch_index(requirement).await?;
                check_sdist_metadata(fetched.local_path()).await?;
                fetched
            }
            RequirementKind::Vcs => self.fetch_vcs(requirement).await?,
            RequirementKind::Url => self.fetch_url(requirement, trusted_hosts).await?,
        };

        if require_hashes || requirement.kind == RequirementKind::Url {
            let specs = if requirement.hashes.is_empty() {
                requirement
                    .qualifiers
                    .get(HASH_QUALIFIER)
                    .cloned()
                    .into_iter()
                    .collect()
            } else {
                requirement.hashes.clone()
            };
            let checksums = specs
                .iter()
                .map(|spec| Checksum::from_str(spec))
                .collect::<Result<Vec<_>, _>>()?;
            verify_any_checksum(fetched.local_path(), &checksums).await?;
        }

        // A fresh VCS/URL artifact goes into the shared raw cache so the
        // next request gets it without an origin fetch.
        match &fetched {
            FetchedDependency::Vcs {
                raw_component_name,
                path,
                already_mirrored: false,
                ..
            }
            | FetchedDependency::Url {
                raw_component_name,
                path,
                already_mirrored: false,
                ..
            } => {
                self.mirror
                    .publish_raw_artifact(&self.config.raw_cache_repo, raw_component_name, path)
                    .await?;
            }
            _ => {}
        }

        info!("Successfully downloaded {}", requirement.download_line);
        Ok(fetched)
    }

    /// Resolve and download an sdist from the simple index of the proxy.
    async fn fetch_index(&self, requirement: &Requirement) -> Result<FetchedDependency, Error> {
        let version = requirement
            .version_specs
            .first()
            .map(|(_, version)| version.as_str())
            .ok_or_else(|| {
                Error::Internal(format!(
                    "index requirement `{}` has no version spec",
                    requirement.name
                ))
            })?;

        let package_url = Url::parse(&format!(
            "{}/simple/{}/",
            self.config.pypi_proxy_url.trim_end_matches('/'),
            requirement.name
        ))?;
        let body = self
            .client
            .get_text(&package_url, Some(&self.config.store_credentials))
            .await?;
        let page = SimpleIndexPage::parse(&body)?;

        let sdists = find_sdists(&page, &requirement.name, version);
        if sdists.is_empty() {
            return Err(Error::NoSdists {
                name: requirement.name.clone(),
                version: version.to_string(),
            });
        }
        let sdist = select_best_sdist(&sdists).ok_or_else(|| {
            Error::Internal("candidate selection on a non-empty set came up empty".to_string())
        })?;
        if sdist.yanked {
            return Err(Error::AllYanked {
                name: requirement.name.clone(),
                version: version.to_string(),
            });
        }

        let package_dir = self.pip_deps_dir.join(&sdist.name);
        fs_err::tokio::create_dir_all(&package_dir).await?;
        let download_path = package_dir.join(&sdist.filename);

        // The proxy serves the file URLs relative to the package page.
        let href = sdist
            .href
            .as_deref()
            .ok_or_else(|| Error::MissingAnchorHref(sdist.filename.clone()))?;
        let file_url = package_url.join(href)?;
        self.client
            .download(
                &file_url,
                &download_path,
                Some(&self.config.store_credentials),
                false,
            )
            .await?;

        Ok(FetchedDependency::Index {
            name: requirement.name.clone(),
            version: canonicalize_version(&sdist.version),
            path: download_path,
        })
    }

    /// Fetch the source of a git requirement, preferring the raw cache over
    /// the origin repository.
    async fn fetch_vcs(&self, requirement: &Requirement) -> Result<FetchedDependency, Error> {
        let vcs_url = requirement_url(requirement)?;
        let git_info = extract_git_info(vcs_url)?;

        // Download to e.g. deps/pip/github.com/namespace/repo.
        let mut package_dir = self.pip_deps_dir.join(&git_info.host);
        for part in git_info.namespace.split('/').filter(|part| !part.is_empty()) {
            package_dir.push(part);
        }
        package_dir.push(&git_info.repo);
        fs_err::tokio::create_dir_all(&package_dir).await?;

        let raw_component_name = vcs_raw_component_name(&git_info);
        let filename = raw_filename(&raw_component_name);
        let download_path = package_dir.join(filename);

        let already_mirrored = self
            .download_raw_component(&raw_component_name, &download_path)
            .await?;
        if !already_mirrored {
            debug!("Raw component not found, will fetch from git");
            let archive = self
                .git
                .fetch(&git_info.url, &git_info.reference)
                .await?;
            fs_err::tokio::copy(&archive, &download_path).await?;
        }

        Ok(FetchedDependency::Vcs {
            name: requirement.name.clone(),
            path: download_path,
            url: git_info.url,
            reference: git_info.reference,
            host: git_info.host,
            namespace: git_info.namespace,
            repo: git_info.repo,
            raw_component_name,
            already_mirrored,
        })
    }

    /// Fetch an sdist from a plain URL, preferring the raw cache over the
    /// origin.
    async fn fetch_url(
        &self,
        requirement: &Requirement,
        trusted_hosts: &HashSet<&str>,
    ) -> Result<FetchedDependency, Error> {
        let original_url = requirement_url(requirement)?;
        let parsed = Url::parse(original_url)?;

        let raw_component_name = url_raw_component_name(requirement)?;
        let filename = raw_filename(&raw_component_name);
        let package_dir = self
            .pip_deps_dir
            .join(format!("external-{}", requirement.name));
        fs_err::tokio::create_dir_all(&package_dir).await?;
        let download_path = package_dir.join(filename);

        let already_mirrored = self
            .download_raw_component(&raw_component_name, &download_path)
            .await?;
        if !already_mirrored {
            debug!("Raw component not found, will download from {original_url}");
            let insecure = is_trusted(&parsed, trusted_hosts);
            if insecure {
                debug!(
                    "Disabling TLS verification, {} is a --trusted-host",
                    parsed.host_str().unwrap_or_default()
                );
            }
            self.client
                .download(&parsed, &download_path, None, insecure)
                .await?;
        }

        let url_with_hash = if requirement.qualifiers.contains_key(HASH_QUALIFIER) {
            original_url.to_string()
        } else {
            let hash_spec = requirement.hashes.first().ok_or_else(|| {
                Error::Internal(format!(
                    "URL requirement `{}` passed validation without a hash",
                    requirement.name
                ))
            })?;
            add_hash_to_url(&parsed, hash_spec)
        };

        Ok(FetchedDependency::Url {
            name: requirement.name.clone(),
            path: download_path,
            original_url: original_url.to_string(),
            url_with_hash,
            raw_component_name,
            already_mirrored,
        })
    }

    /// Download a raw component from the shared cache if it is there.
    /// Returns whether it was.
    async fn download_raw_component(
        &self,
        raw_component_name: &str,
        download_path: &Path,
    ) -> Result<bool, Error> {
        match self
            .mirror
            .raw_asset_url(&self.config.raw_cache_repo, raw_component_name)
            .await?
        {
            Some(asset_url) => {
                debug!("Found raw component, will download from {asset_url}");
                self.client
                    .download(
                        &asset_url,
                        download_path,
                        Some(&self.config.store_credentials),
                        false,
                    )
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn requirement_url(requirement: &Requirement) -> Result<&str, Error> {
    requirement.url().ok_or_else(|| {
        Error::Internal(format!(
            "{} requirement `{}` has no URL",
            requirement.kind, requirement.name
        ))
    })
}

/// `<repo>/<repo>-external-gitcommit-<ref>.tar.gz`
pub(crate) fn vcs_raw_component_name(git_info: &GitInfo) -> String {
    format!(
        "{repo}/{repo}-external-gitcommit-{reference}.tar.gz",
        repo = git_info.repo,
        reference = git_info.reference,
    )
}

/// `<name>/<name>-external-<algorithm>-<digest><ext>`
pub(crate) fn url_raw_component_name(requirement: &Requirement) -> Result<String, Error> {
    let hash_spec = requirement
        .hashes
        .first()
        .or_else(|| requirement.qualifiers.get(HASH_QUALIFIER))
        .ok_or_else(|| {
            Error::Internal(format!(
                "URL requirement `{}` passed validation without a hash",
                requirement.name
            ))
        })?;
    let (algorithm, digest) = hash_spec.split_once(':').ok_or_else(|| {
        Error::Internal(format!("hash specifier `{hash_spec}` passed validation"))
    })?;

    let url = Url::parse(requirement_url(requirement)?)?;
    let extension = SdistExtension::from_path(url.path()).map_err(|_| {
        Error::Internal(format!(
            "URL requirement `{}` passed validation without an sdist extension",
            requirement.name
        ))
    })?;

    Ok(format!(
        "{name}/{name}-external-{algorithm}-{digest}{extension}",
        name = requirement.name,
    ))
}

fn raw_filename(raw_component_name: &str) -> &str {
    raw_component_name
        .rsplit_once('/')
        .map_or(raw_component_name, |(_, filename)| filename)
}

/// Is the URL's host (or `host:port`) marked trusted?
fn is_trusted(url: &Url, trusted_hosts: &HashSet<&str>) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if trusted_hosts.contains(host) {
        return true;
    }
    url.port()
        .is_some_and(|port| trusted_hosts.contains(format!("{host}:{port}").as_str()))
}

/// Append the `cachito_hash` qualifier to a URL's fragment.
fn add_hash_to_url(url: &Url, hash_spec: &str) -> String {
    let mut with_hash = url.clone();
    let fragment = match url.fragment() {
        Some(fragment) if !fragment.is_empty() => format!("{fragment}&cachito_hash={hash_spec}"),
        _ => format!("cachito_hash={hash_spec}"),
    };
    with_hash.set_fragment(Some(&fragment));
    with_hash.to_string()
}
