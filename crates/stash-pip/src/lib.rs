//! The pip backend of the build-cache service.
//!
//! Resolves the full set of source distributions needed to build an
//! application from its pinned requirements manifests, materializes them
//! into the request's bundle tree, and mirrors them into per-request hosted
//! repositories so downstream builds can run network-isolated.
//!
//! The caller supplies the HTTP [`Client`], an [`ArtifactStore`]
//! implementation and a [`GitFetcher`] implementation; everything else is
//! driven from [`Resolver::resolve`].

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use stash_client::Client;
use stash_metadata::extract_metadata;
use stash_mirror::{pypi_repo_name, raw_repo_name, repo_url, repo_username, ArtifactStore, Mirror};
use stash_requirements::RequirementsFile;

pub use bundle::BundleDir;
pub use config::{Config, Request};
pub use error::{Error, FaultKind};
pub use fetch::FetchedDependency;
pub use vcs::{extract_git_info, GitFetchError, GitFetcher, GitInfo};

mod bundle;
mod config;
mod error;
mod fetch;
mod sdist;
mod vcs;

/// The manifest probed for at the source root when none are specified.
pub const DEFAULT_REQUIREMENTS_FILE: &str = "requirements.txt";
/// Same, for build-time dependencies.
pub const DEFAULT_BUILD_REQUIREMENTS_FILE: &str = "requirements-build.txt";

/// The root package of a resolved source tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub version: String,
}

/// One resolved, materialized and mirrored dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub package_type: String,
    /// True for dependencies that came from a build manifest.
    pub dev: bool,
}

/// The result of [`Resolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProject {
    pub root_package: Package,
    pub dependencies: Vec<Dependency>,
    /// The manifests that were consumed, in input order.
    pub manifest_paths: Vec<PathBuf>,
}

/// Access credentials for a request's hosted repositories, handed to the
/// downstream build.
#[derive(Debug, Clone)]
pub struct RepoAccess {
    pub username: String,
    pub password: String,
    /// The simple-API index URL with the credentials inlined.
    pub index_url: String,
}

/// The pip backend, bound to its external collaborators.
pub struct Resolver<S, G> {
    config: Config,
    client: Client,
    mirror: Mirror<S>,
    git: G,
}

impl<S: ArtifactStore, G: GitFetcher> Resolver<S, G> {
    pub fn new(config: Config, client: Client, store: S, git: G) -> Self {
        Self {
            config,
            client,
            mirror: Mirror::new(store),
            git,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mirror(&self) -> &Mirror<S> {
        &self.mirror
    }

    /// Resolve and fetch pip dependencies for the given application source.
    ///
    /// If `manifests` is unspecified, probes for [`DEFAULT_REQUIREMENTS_FILE`]
    /// at the source root; same for `build_manifests` with
    /// [`DEFAULT_BUILD_REQUIREMENTS_FILE`]. Relative manifest paths resolve
    /// against the source root. Dependencies from build manifests are marked
    /// `dev`.
    pub async fn resolve(
        &self,
        source_path: &Path,
        request: &Request,
        manifests: Option<Vec<PathBuf>>,
        build_manifests: Option<Vec<PathBuf>>,
    ) -> Result<ResolvedProject, Error> {
        debug!("Checking if the application source uses pip");
        let metadata = extract_metadata(source_path)?;

        let manifest_files = manifest_paths(source_path, manifests, DEFAULT_REQUIREMENTS_FILE);
        let build_manifest_files =
            manifest_paths(source_path, build_manifests, DEFAULT_BUILD_REQUIREMENTS_FILE);

        let bundle = BundleDir::new(&self.config.bundles_dir, request.id);
        let fetcher = fetch::Fetcher {
            config: &self.config,
            client: &self.client,
            mirror: &self.mirror,
            git: &self.git,
            pip_deps_dir: bundle.pip_deps_dir(),
        };

        let mut fetched: Vec<(FetchedDependency, bool)> = Vec::new();
        for path in &manifest_files {
            let manifest = RequirementsFile::parse(path)?;
            let downloads = fetcher.download_dependencies(&manifest).await?;
            fetched.extend(downloads.into_iter().map(|dependency| (dependency, false)));
        }
        for path in &build_manifest_files {
            let manifest = RequirementsFile::parse(path)?;
            let downloads = fetcher.download_dependencies(&manifest).await?;
            fetched.extend(downloads.into_iter().map(|dependency| (dependency, true)));
        }

        // Publish everything into the request's hosted repositories.
        let pypi_repo = pypi_repo_name(&self.config.request_repo_prefix, request.id);
        let raw_repo = raw_repo_name(&self.config.request_repo_prefix, request.id);
        let mut dependencies = Vec::with_capacity(fetched.len());
        for (dependency, dev) in &fetched {
            dependencies.push(
                self.publish_dependency(dependency, *dev, &pypi_repo, &raw_repo)
                    .await?,
            );
        }

        let mut all_manifests = manifest_files;
        all_manifests.extend(build_manifest_files);

        Ok(ResolvedProject {
            root_package: Package {
                name: metadata.name,
                version: metadata.version,
            },
            dependencies,
            manifest_paths: all_manifests,
        })
    }

    async fn publish_dependency(
        &self,
        dependency: &FetchedDependency,
        dev: bool,
        pypi_repo: &str,
        raw_repo: &str,
    ) -> Result<Dependency, Error> {
        match dependency {
            FetchedDependency::Index {
                name,
                version,
                path,
            } => {
                self.mirror
                    .publish_pypi_artifact(pypi_repo, name, version, path)
                    .await?;
            }
            FetchedDependency::Vcs {
                raw_component_name,
                path,
                ..
            }
            | FetchedDependency::Url {
                raw_component_name,
                path,
                ..
            } => {
                self.mirror
                    .publish_raw_artifact(raw_repo, raw_component_name, path)
                    .await?;
            }
        }

        Ok(Dependency {
            name: dependency.name().to_string(),
            version: dependency.version_string(),
            package_type: "pip".to_string(),
            dev,
        })
    }

    /// Run the store's "before content staged" script for the request.
    pub async fn prepare_for_request(&self, request: &Request) -> Result<(), Error> {
        let pypi_repo = pypi_repo_name(&self.config.request_repo_prefix, request.id);
        let raw_repo = raw_repo_name(&self.config.request_repo_prefix, request.id);
        self.mirror
            .prepare_for_request(&pypi_repo, &raw_repo)
            .await?;
        Ok(())
    }

    /// Run the store's "after content staged" script, creating the
    /// request's read-only user. Returns the generated access data.
    pub async fn finalize_for_request(&self, request: &Request) -> Result<RepoAccess, Error> {
        let pypi_repo = pypi_repo_name(&self.config.request_repo_prefix, request.id);
        let raw_repo = raw_repo_name(&self.config.request_repo_prefix, request.id);
        let username = repo_username(request.id);
        let password = self
            .mirror
            .finalize_for_request(&pypi_repo, &raw_repo, &username)
            .await?;

        let hosted_url = repo_url(&self.config.store_url, &pypi_repo);
        let index_url = stash_mirror::index_url(&hosted_url, &username, &password)?;
        Ok(RepoAccess {
            username,
            password,
            index_url,
        })
    }
}

/// Resolve the manifest list: explicit paths against the source root, or
/// probe for the default file.
fn manifest_paths(
    source_path: &Path,
    provided: Option<Vec<PathBuf>>,
    default_name: &str,
) -> Vec<PathBuf> {
    match provided {
        Some(paths) => paths
            .into_iter()
            .map(|path| {
                if path.is_absolute() {
                    path
                } else {
                    source_path.join(path)
                }
            })
            .collect(),
        None => {
            let candidate = source_path.join(default_name);
            if candidate.is_file() {
                vec![candidate]
            } else {
                Vec::new()
            }
        }
    }
}
