//! File extensions of Python source distributions.

use std::fmt;
use std::fmt::{Display, Formatter};

use thiserror::Error;

/// A recognized source distribution extension.
///
/// Only sdist formats are supported; binary wheels are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdistExtension {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    /// Unix `compress`-ed tar. Recognized, but not inspectable without
    /// external tooling.
    TarZ,
    Tar,
}

impl SdistExtension {
    /// All recognized extensions. The order determines which extension wins
    /// when several could match; longer spellings come before `.tar`.
    pub const ALL: [Self; 6] = [
        Self::Zip,
        Self::TarGz,
        Self::TarBz2,
        Self::TarXz,
        Self::TarZ,
        Self::Tar,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
            Self::TarBz2 => ".tar.bz2",
            Self::TarXz => ".tar.xz",
            Self::TarZ => ".tar.Z",
            Self::Tar => ".tar",
        }
    }

    /// Match a filename (or URL path) against the recognized extensions,
    /// returning the first that applies.
    pub fn from_path(path: &str) -> Result<Self, ExtensionError> {
        Self::ALL
            .into_iter()
            .find(|ext| path.ends_with(ext.as_str()))
            .ok_or_else(|| ExtensionError {
                path: path.to_string(),
            })
    }

    /// Split a filename into its stem and sdist extension.
    pub fn split(filename: &str) -> Result<(&str, Self), ExtensionError> {
        let extension = Self::from_path(filename)?;
        let stem = &filename[..filename.len() - extension.as_str().len()];
        Ok((stem, extension))
    }
}

impl Display for SdistExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The path does not end in a recognized sdist extension.
#[derive(Debug, Clone, Error)]
#[error(
    "No recognized source distribution extension on `{path}` (expected one of `.zip`, `.tar.gz`, `.tar.bz2`, `.tar.xz`, `.tar.Z`, `.tar`)"
)]
pub struct ExtensionError {
    path: String,
}
