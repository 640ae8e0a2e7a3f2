//! Streaming checksum computation and verification.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use sha2::Digest;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake2b,
    Blake2s,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Blake2b => "blake2b",
            Self::Blake2s => "blake2s",
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "md5" => Self::Md5,
            "sha224" => Self::Sha224,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            "blake2b" => Self::Blake2b,
            "blake2s" => Self::Blake2s,
            other => return Err(Error::UnsupportedAlgorithm(other.to_string())),
        })
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `algorithm:digest` pair, as spelled in `--hash` options and
/// `cachito_hash` qualifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let Some((algorithm, digest)) = spec.split_once(':') else {
            return Err(Error::MalformedChecksum(spec.to_string()));
        };
        if digest.is_empty() {
            return Err(Error::MalformedChecksum(spec.to_string()));
        }
        Ok(Self {
            algorithm: algorithm.parse()?,
            digest: digest.to_ascii_lowercase(),
        })
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

/// Check that a file verifies against at least one of the provided checksums.
pub async fn verify_any_checksum(path: &Path, checksums: &[Checksum]) -> Result<(), Error> {
    let path_display = path.display().to_string();
    info!("Verifying checksum of {path_display}");

    for checksum in checksums {
        let computed = compute_checksum(path, checksum.algorithm).await?;
        if computed == checksum.digest {
            info!("Checksum of {path_display} matches: {checksum}");
            return Ok(());
        }
        error!("Checksum of {path_display} does not match {checksum}");
    }

    Err(Error::ChecksumMismatch { path: path_display })
}

/// Compute a file's hex digest under the given algorithm.
pub async fn compute_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, Error> {
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_file::<md5::Md5>(path).await,
        ChecksumAlgorithm::Sha224 => digest_file::<sha2::Sha224>(path).await,
        ChecksumAlgorithm::Sha256 => digest_file::<sha2::Sha256>(path).await,
        ChecksumAlgorithm::Sha384 => digest_file::<sha2::Sha384>(path).await,
        ChecksumAlgorithm::Sha512 => digest_file::<sha2::Sha512>(path).await,
        ChecksumAlgorithm::Blake2b => digest_file::<blake2::Blake2b512>(path).await,
        ChecksumAlgorithm::Blake2s => digest_file::<blake2::Blake2s256>(path).await,
    }
}

async fn digest_file<D: Digest>(path: &Path) -> Result<String, Error> {
    let mut file = fs_err::tokio::File::open(path).await?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
