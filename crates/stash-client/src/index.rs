//! Selection of sdist candidates from a simple-index page.

use regex::Regex;

use stash_filename::SdistExtension;
use stash_normalize::{canonicalize_version, PackageName};

use crate::html::SimpleIndexPage;

/// An sdist offered by the index at the requested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdistCandidate {
    /// The package name as spelled in the filename.
    pub name: String,
    /// The version as spelled in the filename.
    pub version: String,
    pub filename: String,
    pub href: Option<String>,
    pub yanked: bool,
}

/// Pick out the sdists at the requested version from an index page.
///
/// Anchor text is matched as `<name>-<version><extension>`, where the name
/// may be any spelling that canonicalizes to the requested name and the
/// version is compared canonically.
pub fn find_sdists(
    page: &SimpleIndexPage,
    name: &PackageName,
    version: &str,
) -> Vec<SdistCandidate> {
    let canonical_version = canonicalize_version(version);
    let pattern = sdist_re(name);

    page.anchors
        .iter()
        .filter_map(|anchor| {
            let captures = pattern.captures(&anchor.text)?;
            let candidate_name = captures.get(1)?.as_str();
            let candidate_version = captures.get(2)?.as_str();
            if canonicalize_version(candidate_version) != canonical_version {
                return None;
            }
            Some(SdistCandidate {
                name: candidate_name.to_string(),
                version: candidate_version.to_string(),
                filename: anchor.text.clone(),
                href: anchor.href.clone(),
                yanked: anchor.yanked,
            })
        })
        .collect()
}

/// Choose the best candidate: files that are not yanked win over ones that
/// are, and within the same category `.tar.gz` > `.zip` > anything else.
/// The first candidate wins ties, so equally-preferred spelling variants
/// resolve to the one listed first.
pub fn select_best_sdist(candidates: &[SdistCandidate]) -> Option<&SdistCandidate> {
    fn preference(candidate: &SdistCandidate) -> (u8, u8) {
        let yanked_preference = u8::from(!candidate.yanked);
        let filetype_preference = if candidate.filename.ends_with(".tar.gz") {
            2
        } else if candidate.filename.ends_with(".zip") {
            1
        } else {
            0
        };
        (yanked_preference, filetype_preference)
    }

    candidates.iter().fold(None, |best, candidate| match best {
        Some(best) if preference(candidate) <= preference(best) => Some(best),
        _ => Some(candidate),
    })
}

/// `^(<name-variant>)-(<version>)<sdist-extension>$`, case-insensitive, where
/// the name variant treats `-`, `_` and `.` as interchangeable.
fn sdist_re(name: &PackageName) -> Regex {
    // A canonical name contains only ASCII alphanumerics and dashes, so no
    // escaping is needed.
    let name_pattern: String = name
        .as_str()
        .chars()
        .map(|c| {
            if c == '-' {
                "[-_.]+".to_string()
            } else {
                c.to_string()
            }
        })
        .collect();
    let extension_pattern = SdistExtension::ALL
        .iter()
        .map(|ext| regex::escape(ext.as_str()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        "(?i)^({name_pattern})-(.+)(?:{extension_pattern})$"
    ))
    .unwrap()
}
