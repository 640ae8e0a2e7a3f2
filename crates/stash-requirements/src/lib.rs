//! Parsing and validation of pip requirements manifests.
//!
//! A manifest is the line-oriented `requirements.txt` format: global options,
//! per-requirement options, line continuations and comments. Every
//! requirement must be pinned — either to an exact version (index
//! requirements) or to an immutable ref/hash (VCS and URL requirements); this
//! crate enforces those rules up front so the fetch pipeline only ever sees
//! well-formed input.

use thiserror::Error;

pub use manifest::RequirementsFile;
pub use options::{process_options, GlobalOptions};
pub use requirement::{Operator, Requirement, RequirementKind};
pub use validate::{validate_hashes, validate_requirements};

mod manifest;
mod options;
mod requirement;
mod validate;

/// The URL fragment key that can carry a requirement's integrity hash.
pub const HASH_QUALIFIER: &str = "cachito_hash";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unknown requirements file option `{0}`")]
    UnknownOption(String),

    #[error("Unexpected value for requirements file option `{0}`")]
    UnexpectedOptionValue(String),

    #[error("Requirements file option `{0}` requires a value")]
    OptionMissingValue(String),

    #[error("Requirements file options {0:?} can only be applied to a requirement")]
    OptionsWithoutRequirement(Vec<String>),

    #[error("Unable to extract scheme from direct access requirement `{0}`")]
    AmbiguousScheme(String),

    #[error("Direct references with `{scheme}` scheme are not supported: `{line}`")]
    UnsupportedScheme { scheme: String, line: String },

    #[error("Package name could not be determined from the requirement `{0}`")]
    MissingPackageName(String),

    #[error("Unable to parse the requirement `{line}`: {message}")]
    InvalidRequirement { line: String, message: String },

    #[error("Requirements file options {0:?} are not supported")]
    RejectedOptions(Vec<String>),

    #[error("Requirement must be pinned to an exact version: {0}")]
    Unpinned(String),

    #[error("Invalid URL in requirement `{line}`: {source}")]
    InvalidUrl {
        line: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported VCS for {line}: {scheme}")]
    UnsupportedVcs { scheme: String, line: String },

    #[error("No git ref in {0} (expected 40 hexadecimal characters)")]
    MissingGitRef(String),

    #[error(
        "URL requirement must specify exactly one hash, but specifies {count}: {line}. Use the `--hash` option or the `#cachito_hash` URL fragment, but not both (or more than one `--hash`)."
    )]
    UrlHashCount { count: usize, line: String },

    #[error(
        "URL for requirement does not contain any recognized file extension: {line} (expected one of `.zip`, `.tar.gz`, `.tar.bz2`, `.tar.xz`, `.tar.Z`, `.tar`)"
    )]
    MissingExtension { line: String },

    #[error("Hash is required, dependency does not specify any: {0}")]
    MissingHash(String),

    #[error("Not a valid hash specifier: `{0}` (expected `algorithm:digest`)")]
    MalformedHash(String),
}
