use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// A generic request error happened while making a request. Refer to the
    /// error message for more details.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// A generic request middleware error happened while making a request.
    #[error(transparent)]
    Middleware(#[from] reqwest_middleware::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    HtmlParse(#[from] tl::ParseError),

    #[error("Download destination {0:?} has no parent directory")]
    InvalidDestination(PathBuf),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Not a valid hash specifier: `{0}` (expected `algorithm:digest`)")]
    MalformedChecksum(String),

    #[error("Failed to verify checksum of {path} against any of the provided hashes")]
    ChecksumMismatch { path: String },
}
