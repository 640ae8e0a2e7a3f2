use thiserror::Error;

use stash_normalize::PackageName;

use crate::vcs::GitFetchError;

/// The coarse fault classification surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An option was rejected, a direct-reference scheme is unsupported, or
    /// a resolved path escaped the project directory.
    Config,
    /// The manifest or metadata failed structural checks.
    Validation,
    /// The project name or version could not be resolved.
    Metadata,
    /// An index query, download, checksum or sdist inspection failed.
    Fetch,
    /// The artifact store rejected an upload with no existing component.
    Mirror,
    /// Bug paths.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Requirements(#[from] stash_requirements::Error),

    #[error(transparent)]
    Metadata(#[from] stash_metadata::Error),

    #[error(transparent)]
    Client(#[from] stash_client::Error),

    #[error(transparent)]
    Mirror(#[from] stash_mirror::MirrorError),

    #[error(transparent)]
    Git(#[from] GitFetchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error("No sdists found for package {name}=={version}")]
    NoSdists { name: PackageName, version: String },

    #[error("All sdists for package {name}=={version} are yanked")]
    AllYanked { name: PackageName, version: String },

    #[error("The index page has no download URL for `{0}`")]
    MissingAnchorHref(String),

    #[error(
        "{path} does not include metadata (there is no PKG-INFO file). It is not a valid sdist and cannot be downloaded from PyPI. Consider editing your requirements file to download the package from git or a direct download URL instead."
    )]
    MissingPkgInfo { path: String },

    #[error("Cannot open {path} as a {format} file")]
    InvalidArchive {
        path: String,
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Unexpected internal state: {0}")]
    Internal(String),
}

impl Error {
    /// Classify the error into the caller-facing taxonomy.
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Requirements(err) => match err {
                stash_requirements::Error::UnsupportedScheme { .. }
                | stash_requirements::Error::RejectedOptions(_) => FaultKind::Config,
                _ => FaultKind::Validation,
            },
            Self::Metadata(err) => match err {
                stash_metadata::Error::PathEscape { .. } => FaultKind::Config,
                stash_metadata::Error::InvalidModuleName(_) => FaultKind::Validation,
                _ => FaultKind::Metadata,
            },
            Self::Client(err) => match err {
                stash_client::Error::UnsupportedAlgorithm(_)
                | stash_client::Error::MalformedChecksum(_) => FaultKind::Validation,
                _ => FaultKind::Fetch,
            },
            Self::Mirror(_) => FaultKind::Mirror,
            Self::Git(_) | Self::Io(_) => FaultKind::Fetch,
            Self::UrlParse(_) => FaultKind::Validation,
            Self::NoSdists { .. }
            | Self::AllYanked { .. }
            | Self::MissingAnchorHref(_)
            | Self::MissingPkgInfo { .. }
            | Self::InvalidArchive { .. } => FaultKind::Fetch,
            Self::Internal(_) => FaultKind::Internal,
        }
    }
}
