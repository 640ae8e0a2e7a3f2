use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use stash_filename::SdistExtension;

use crate::requirement::{Operator, Requirement, RequirementKind};
use crate::{Error, HASH_QUALIFIER};

/// The path component of a VCS URL must end with a full-length git ref.
fn git_ref_re() -> &'static Regex {
    static GIT_REF_RE: OnceLock<Regex> = OnceLock::new();
    GIT_REF_RE.get_or_init(|| Regex::new(r"@[a-fA-F0-9]{40}$").unwrap())
}

/// Structural validation, run before any fetch:
///
/// - index requirements must be pinned with `==` or `===` to a single version
/// - VCS requirements must use git and carry a 40-hex ref in the path
/// - URL requirements must carry exactly one hash and a recognized sdist
///   extension
pub fn validate_requirements(requirements: &[Requirement]) -> Result<(), Error> {
    for requirement in requirements {
        match requirement.kind {
            RequirementKind::Index => {
                let pinned = matches!(
                    requirement.version_specs.as_slice(),
                    [(Operator::Equal | Operator::ArbitraryEqual, _)]
                );
                if !pinned {
                    return Err(Error::Unpinned(requirement.download_line.clone()));
                }
            }
            RequirementKind::Vcs => {
                let url = parse_requirement_url(requirement)?;
                if !url.scheme().starts_with("git") {
                    return Err(Error::UnsupportedVcs {
                        scheme: url.scheme().to_string(),
                        line: requirement.download_line.clone(),
                    });
                }
                if !git_ref_re().is_match(url.path()) {
                    return Err(Error::MissingGitRef(requirement.download_line.clone()));
                }
            }
            RequirementKind::Url => {
                let count = requirement.hashes.len()
                    + usize::from(requirement.qualifiers.contains_key(HASH_QUALIFIER));
                if count != 1 {
                    return Err(Error::UrlHashCount {
                        count,
                        line: requirement.download_line.clone(),
                    });
                }

                let url = parse_requirement_url(requirement)?;
                if SdistExtension::from_path(url.path()).is_err() {
                    return Err(Error::MissingExtension {
                        line: requirement.download_line.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Validate that hashes are not missing and parse as `algorithm:digest`.
///
/// Must run after [`validate_requirements`], which guarantees every URL
/// requirement has its one hash.
pub fn validate_hashes(requirements: &[Requirement], require_hashes: bool) -> Result<(), Error> {
    for requirement in requirements {
        let hashes: Vec<&str> = if requirement.kind == RequirementKind::Url {
            requirement
                .hashes
                .iter()
                .map(String::as_str)
                .chain(
                    requirement
                        .qualifiers
                        .get(HASH_QUALIFIER)
                        .map(String::as_str),
                )
                .collect()
        } else {
            requirement.hashes.iter().map(String::as_str).collect()
        };

        // This can only happen for non-URL requirements; URL requirements
        // without a hash fail structural validation first.
        if require_hashes && hashes.is_empty() {
            return Err(Error::MissingHash(requirement.download_line.clone()));
        }

        for hash_spec in hashes {
            match hash_spec.split_once(':') {
                Some((_, digest)) if !digest.is_empty() => {}
                _ => return Err(Error::MalformedHash(hash_spec.to_string())),
            }
        }
    }
    Ok(())
}

fn parse_requirement_url(requirement: &Requirement) -> Result<Url, Error> {
    let raw = requirement.url().ok_or_else(|| Error::InvalidRequirement {
        line: requirement.download_line.clone(),
        message: "requirement has no URL".to_string(),
    })?;
    Url::parse(raw).map_err(|source| Error::InvalidUrl {
        line: requirement.download_line.clone(),
        source,
    })
}
