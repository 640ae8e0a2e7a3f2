use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, warn};

use stash_normalize::PackageName;

use crate::Error;

/// The source a requirement is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    /// Resolved against the simple index of the package proxy.
    Index,
    /// A direct reference to a version control repository.
    Vcs,
    /// A direct reference to a plain archive URL.
    Url,
}

impl Display for RequirementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index => f.write_str("index"),
            Self::Vcs => f.write_str("vcs"),
            Self::Url => f.write_str("url"),
        }
    }
}

/// A version comparison operator, as written in a version specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    ArbitraryEqual,
    NotEqual,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    Compatible,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::ArbitraryEqual => "===",
            Self::NotEqual => "!=",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Compatible => "~=",
        }
    }

    /// Split an operator off the front of a version specifier. Longer
    /// spellings are tried first so `===` does not parse as `==` + `=1.0`.
    fn strip(spec: &str) -> Option<(Self, &str)> {
        for operator in [
            Self::ArbitraryEqual,
            Self::Equal,
            Self::NotEqual,
            Self::LessOrEqual,
            Self::GreaterOrEqual,
            Self::Compatible,
            Self::Less,
            Self::Greater,
        ] {
            if let Some(rest) = spec.strip_prefix(operator.as_str()) {
                return Some((operator, rest));
            }
        }
        None
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single requirement parsed from a manifest line, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    /// The package name as spelled in the manifest.
    pub raw_name: String,
    /// The normalized package name.
    pub name: PackageName,
    pub kind: RequirementKind,
    /// `(operator, version)` pairs; only meaningful for index requirements.
    pub version_specs: Vec<(Operator, String)>,
    /// Requested extras, informational only.
    pub extras: Vec<String>,
    pub environment_marker: Option<String>,
    /// Integrity hashes in `algorithm:digest` form, from `--hash` options.
    pub hashes: Vec<String>,
    /// `key=value` pairs from the direct-reference URL fragment.
    pub qualifiers: IndexMap<String, String>,
    /// The canonical requirement text, without options or hashes.
    pub download_line: String,
    /// Per-requirement options other than `--hash`.
    pub options: Vec<String>,
    url: Option<String>,
}

const URL_SCHEMES: [&str; 3] = ["http", "https", "ftp"];
const VCS_PREFIXES: [&str; 4] = ["bzr", "git", "hg", "svn"];

/// Does the line spell out a package name before the URL, as in
/// `name @ https://...`?
fn has_name_re() -> &'static Regex {
    static HAS_NAME_RE: OnceLock<Regex> = OnceLock::new();
    HAS_NAME_RE.get_or_init(|| Regex::new(r"@.+://").unwrap())
}

impl Requirement {
    /// Parse a requirement from its manifest text and the options that were
    /// attached to it on the same line.
    pub fn from_line(line: &str, options: Vec<String>) -> Result<Self, Error> {
        let line = line.trim();
        let mut kind = RequirementKind::Index;
        let mut to_parse = line.to_string();
        let mut qualifiers = IndexMap::new();

        if let Some(direct_kind) = assess_direct_access(line)? {
            kind = direct_kind;
            (to_parse, qualifiers) = adjust_direct_access(line)?;
        }

        let parsed = parse_requirement_text(&to_parse)?;
        let (hashes, options) = split_hashes_from_options(options);

        let name = PackageName::new(&parsed.raw_name).map_err(|err| Error::InvalidRequirement {
            line: line.to_string(),
            message: err.to_string(),
        })?;

        let url = match kind {
            RequirementKind::Index => None,
            // package @ url ; environment_marker
            RequirementKind::Vcs | RequirementKind::Url => {
                to_parse.split_whitespace().nth(2).map(str::to_string)
            }
        };

        Ok(Self {
            raw_name: parsed.raw_name,
            name,
            kind,
            version_specs: parsed.version_specs,
            extras: parsed.extras,
            environment_marker: parsed.marker,
            hashes,
            qualifiers,
            download_line: to_parse,
            options,
            url,
        })
    }

    /// The URL of a VCS or URL requirement. `None` for index requirements.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Copy this requirement, pointing it at a replacement direct-access URL.
    ///
    /// The result is always a URL requirement: extras and version specs are
    /// dropped (pip ignores both on URLs), qualifiers are re-attached to the
    /// new URL, and editable options are removed since pip only supports
    /// editable installs from VCS sources.
    pub fn with_url(&self, url: &str) -> Self {
        let mut parts = vec![self.raw_name.clone(), "@".to_string()];
        let qualifiers_line = self
            .qualifiers
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        if qualifiers_line.is_empty() {
            parts.push(url.to_string());
        } else {
            parts.push(format!("{url}#{qualifiers_line}"));
        }
        if let Some(marker) = &self.environment_marker {
            parts.push(";".to_string());
            parts.push(marker.clone());
        }
        let download_line = parts.join(" ");

        let options: Vec<String> = self
            .options
            .iter()
            .filter(|option| !matches!(option.as_str(), "-e" | "--editable"))
            .cloned()
            .collect();
        if options.len() != self.options.len() {
            warn!(
                "Removed editable option when rewriting the requirement `{}`",
                self.raw_name
            );
        }

        Self {
            raw_name: self.raw_name.clone(),
            name: self.name.clone(),
            kind: RequirementKind::Url,
            version_specs: Vec::new(),
            extras: Vec::new(),
            environment_marker: self.environment_marker.clone(),
            hashes: self.hashes.clone(),
            qualifiers: self.qualifiers.clone(),
            url: download_line.split_whitespace().nth(2).map(str::to_string),
            download_line,
            options,
        }
    }

    /// Copy this requirement with a replacement set of hashes.
    pub fn with_hashes(&self, hashes: Vec<String>) -> Self {
        Self {
            hashes,
            ..self.clone()
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut parts = self.options.clone();
        parts.push(self.download_line.clone());
        parts.extend(self.hashes.iter().map(|hash| format!("--hash={hash}")));
        f.write_str(&parts.join(" "))
    }
}

/// Classify a line as a direct access requirement by its URL scheme, if it
/// has one.
fn assess_direct_access(line: &str) -> Result<Option<RequirementKind>, Error> {
    if !line.contains(':') {
        return Ok(None);
    }
    // Extract the scheme, stripping off the package name if needed,
    // e.g. `name @ https://...`.
    let scheme_field = line.split(':').next().unwrap_or_default();
    let scheme_parts: Vec<&str> = scheme_field.split('@').collect();
    if scheme_parts.len() > 2 {
        return Err(Error::AmbiguousScheme(line.to_string()));
    }
    let scheme = scheme_parts
        .last()
        .unwrap_or(&"")
        .trim()
        .to_ascii_lowercase();

    if URL_SCHEMES.contains(&scheme.as_str()) {
        return Ok(Some(RequirementKind::Url));
    }
    if VCS_PREFIXES
        .iter()
        .any(|vcs| scheme == *vcs || scheme.starts_with(&format!("{vcs}+")))
    {
        return Ok(Some(RequirementKind::Vcs));
    }
    Err(Error::UnsupportedScheme {
        scheme,
        line: line.to_string(),
    })
}

/// Normalize a direct access line into `name @ url [; marker]` form and pull
/// the `key=value` qualifiers out of the URL fragment.
fn adjust_direct_access(line: &str) -> Result<(String, IndexMap<String, String>), Error> {
    let mut package_name: Option<String> = None;
    let mut qualifiers = IndexMap::new();
    let mut url = line;
    let mut environment_marker = None;

    if has_name_re().is_match(line) {
        if let Some((name, rest)) = line.split_once('@') {
            package_name = Some(name.to_string());
            url = rest;
        }
    }

    // For direct access requirements, a space is needed after the semicolon.
    if let Some((rest, marker)) = url.split_once("; ") {
        url = rest;
        environment_marker = Some(marker);
    }

    if let Some((_, fragment)) = url.split_once('#') {
        for section in fragment.split('&') {
            if let Some((attr, value)) = section.split_once('=') {
                let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
                if attr == "egg" {
                    // The egg name wins over a name spelled before the URL,
                    // matching what `pip install` does.
                    package_name = Some(value.clone());
                }
                qualifiers.insert(attr.to_string(), value);
            }
        }
    }

    let Some(package_name) = package_name.filter(|name| !name.trim().is_empty()) else {
        return Err(Error::MissingPackageName(line.to_string()));
    };

    let mut parts = vec![package_name.trim().to_string(), "@".to_string(), url.trim().to_string()];
    if let Some(marker) = environment_marker {
        parts.push(";".to_string());
        parts.push(marker.trim().to_string());
    }
    debug!("Normalized direct access requirement to `{}`", parts.join(" "));
    Ok((parts.join(" "), qualifiers))
}

struct ParsedText {
    raw_name: String,
    extras: Vec<String>,
    version_specs: Vec<(Operator, String)>,
    marker: Option<String>,
}

/// Parse normalized requirement text: a name, optional extras, then either a
/// direct-reference URL or version specifiers, then an optional marker.
fn parse_requirement_text(text: &str) -> Result<ParsedText, Error> {
    let invalid = |message: &str| Error::InvalidRequirement {
        line: text.to_string(),
        message: message.to_string(),
    };

    let (body, marker) = match text.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (text.trim(), None),
    };
    let marker = marker.filter(|marker| !marker.is_empty());

    // A direct reference: everything after `@` is the URL, which needs no
    // further parsing here.
    let (head, url_part) = match body.split_once('@') {
        Some((name, url)) if url.contains("://") => (name.trim(), Some(url.trim())),
        _ => (body, None),
    };

    // The name (with optional `[extras]`) ends at the first operator or at
    // whitespace, except for whitespace that just precedes the extras.
    let (name_and_extras, specs_part) = if url_part.is_some() {
        (head, "")
    } else {
        let mut boundary = None;
        let mut depth = 0usize;
        for (idx, c) in head.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                _ if depth > 0 => {}
                c if "<>=!~".contains(c) => {
                    boundary = Some(idx);
                    break;
                }
                c if c.is_whitespace() => {
                    if head[idx..].trim_start().starts_with('[') {
                        continue;
                    }
                    boundary = Some(idx);
                    break;
                }
                _ => {}
            }
        }
        match boundary {
            Some(idx) => (head[..idx].trim_end(), head[idx..].trim_start()),
            None => (head, ""),
        }
    };

    let (raw_name, extras) = match name_and_extras.split_once('[') {
        Some((name, rest)) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated extras"))?;
            let extras = inner
                .split(',')
                .map(|extra| extra.trim().to_string())
                .filter(|extra| !extra.is_empty())
                .collect();
            (name.trim().to_string(), extras)
        }
        None => (name_and_extras.trim().to_string(), Vec::new()),
    };
    if raw_name.is_empty() {
        return Err(invalid("missing package name"));
    }

    let mut version_specs = Vec::new();
    if !specs_part.is_empty() {
        for spec in specs_part.split(',') {
            let spec = spec.trim();
            let Some((operator, version)) = Operator::strip(spec) else {
                return Err(invalid(&format!("expected a version operator in `{spec}`")));
            };
            let version = version.trim();
            if version.is_empty() || version.contains(char::is_whitespace) {
                return Err(invalid(&format!("invalid version in `{spec}`")));
            }
            version_specs.push((operator, version.to_string()));
        }
    }

    Ok(ParsedText {
        raw_name,
        extras,
        version_specs,
        marker,
    })
}

/// Separate the `--hash` values from the other per-requirement options.
fn split_hashes_from_options(options: Vec<String>) -> (Vec<String>, Vec<String>) {
    let mut hashes = Vec::new();
    let mut reduced = Vec::new();
    let mut is_hash = false;

    for item in options {
        if is_hash {
            hashes.push(item);
            is_hash = false;
            continue;
        }
        is_hash = item == "--hash";
        if !is_hash {
            reduced.push(item);
        }
    }

    (hashes, reduced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Requirement {
        Requirement::from_line(line, Vec::new()).unwrap()
    }

    #[test]
    fn pinned_index_requirement() {
        let req = parse("requests==2.25.1");
        assert_eq!(req.kind, RequirementKind::Index);
        assert_eq!(req.raw_name, "requests");
        assert_eq!(req.name.as_str(), "requests");
        assert_eq!(
            req.version_specs,
            vec![(Operator::Equal, "2.25.1".to_string())],
        );
        assert_eq!(req.download_line, "requests==2.25.1");
        assert_eq!(req.url(), None);
    }

    #[test]
    fn extras_and_marker() {
        let req = parse("AiO-HTTP[speedups,brotli] === 3.7.4 ; python_version >= \"3.6\"");
        assert_eq!(req.raw_name, "AiO-HTTP");
        assert_eq!(req.name.as_str(), "aio-http");
        assert_eq!(req.extras, vec!["speedups", "brotli"]);
        assert_eq!(
            req.version_specs,
            vec![(Operator::ArbitraryEqual, "3.7.4".to_string())],
        );
        assert_eq!(
            req.environment_marker.as_deref(),
            Some("python_version >= \"3.6\""),
        );
    }

    #[test]
    fn multiple_specs() {
        let req = parse("foo>=1.0,<2.0");
        assert_eq!(
            req.version_specs,
            vec![
                (Operator::GreaterOrEqual, "1.0".to_string()),
                (Operator::Less, "2.0".to_string()),
            ],
        );
    }

    #[test]
    fn vcs_requirement() {
        let ref40 = "a".repeat(40);
        let req = parse(&format!(
            "foo @ git+https://github.com/ns/foo.git@{ref40}#egg=foo"
        ));
        assert_eq!(req.kind, RequirementKind::Vcs);
        assert_eq!(req.raw_name, "foo");
        assert_eq!(
            req.url(),
            Some(format!("git+https://github.com/ns/foo.git@{ref40}#egg=foo").as_str()),
        );
        assert_eq!(req.qualifiers.get("egg").map(String::as_str), Some("foo"));
    }

    #[test]
    fn vcs_without_name_uses_egg() {
        let ref40 = "b".repeat(40);
        let req = parse(&format!("git+https://example.org/spam.git@{ref40}#egg=spam"));
        assert_eq!(req.kind, RequirementKind::Vcs);
        assert_eq!(req.raw_name, "spam");
        assert_eq!(
            req.download_line,
            format!("spam @ git+https://example.org/spam.git@{ref40}#egg=spam"),
        );
    }

    #[test]
    fn url_requirement_with_qualifiers() {
        let req = parse(
            "spam @ https://example.org/spam-1.0.tar.gz#egg=spam&cachito_hash=sha256:deadbeef",
        );
        assert_eq!(req.kind, RequirementKind::Url);
        assert_eq!(
            req.qualifiers.get("cachito_hash").map(String::as_str),
            Some("sha256:deadbeef"),
        );
        assert_eq!(
            req.url(),
            Some("https://example.org/spam-1.0.tar.gz#egg=spam&cachito_hash=sha256:deadbeef"),
        );
    }

    #[test]
    fn extras_on_direct_references() {
        let req = parse("foo[postgres,crypto] @ https://example.org/foo-1.0.tar.gz");
        assert_eq!(req.kind, RequirementKind::Url);
        assert_eq!(req.raw_name, "foo");
        assert_eq!(req.extras, vec!["postgres", "crypto"]);
        assert_eq!(req.url(), Some("https://example.org/foo-1.0.tar.gz"));
    }

    #[test]
    fn whitespace_before_extras() {
        let req = parse("foo [bar] ==1.0");
        assert_eq!(req.raw_name, "foo");
        assert_eq!(req.extras, vec!["bar"]);
        assert_eq!(req.version_specs, vec![(Operator::Equal, "1.0".to_string())]);
    }

    #[test]
    fn qualifier_values_are_percent_decoded() {
        let req = parse("egg @ https://example.org/egg.tar.gz#egg=egg&subdirectory=some%2Fdir");
        assert_eq!(
            req.qualifiers.get("subdirectory").map(String::as_str),
            Some("some/dir"),
        );
    }

    #[test]
    fn file_scheme_is_rejected() {
        let err = Requirement::from_line("foo @ file:///tmp/foo.tar.gz", Vec::new()).unwrap_err();
        assert!(
            matches!(&err, Error::UnsupportedScheme { scheme, .. } if scheme == "file"),
            "{err}"
        );
    }

    #[test]
    fn missing_egg_name() {
        let err =
            Requirement::from_line("https://example.org/spam-1.0.tar.gz", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::MissingPackageName(_)), "{err}");
    }

    #[test]
    fn hash_options_are_split_out() {
        let req = Requirement::from_line(
            "requests==2.25.1",
            vec![
                "--hash".to_string(),
                "sha256:1111".to_string(),
                "-e".to_string(),
                "--hash".to_string(),
                "sha512:2222".to_string(),
            ],
        )
        .unwrap();
        assert_eq!(req.hashes, vec!["sha256:1111", "sha512:2222"]);
        assert_eq!(req.options, vec!["-e"]);
        assert_eq!(
            req.to_string(),
            "-e requests==2.25.1 --hash=sha256:1111 --hash=sha512:2222",
        );
    }

    #[test]
    fn with_url_rewrites_the_download_line() {
        let ref40 = "c".repeat(40);
        let original = parse(&format!(
            "eggs @ git+https://example.org/ns/eggs.git@{ref40}#egg=eggs"
        ));
        let rewritten = original.with_url("https://mirror.example.org/eggs.tar.gz");
        assert_eq!(rewritten.kind, RequirementKind::Url);
        assert_eq!(
            rewritten.download_line,
            "eggs @ https://mirror.example.org/eggs.tar.gz#egg=eggs",
        );
        assert!(rewritten.version_specs.is_empty());
        assert!(rewritten.extras.is_empty());
    }

    #[test]
    fn with_url_drops_editable_options() {
        let ref40 = "d".repeat(40);
        let req = Requirement::from_line(
            &format!("ham @ git+https://example.org/ham.git@{ref40}#egg=ham"),
            vec!["-e".to_string()],
        )
        .unwrap();
        let rewritten = req.with_url("https://mirror.example.org/ham.tar.gz");
        assert!(rewritten.options.is_empty());
    }
}
