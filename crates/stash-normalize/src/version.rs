use std::sync::OnceLock;

use regex::Regex;

/// The PEP 440 grammar, loosened the same way `packaging` loosens it: an
/// optional leading `v`, interchangeable `-`/`_`/`.` separators, and spelled
/// out pre-release words (`alpha`, `beta`, `preview`, ...).
fn version_re() -> &'static Regex {
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    VERSION_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^v?(?:(?:(?P<epoch>[0-9]+)!)?(?P<release>[0-9]+(?:\.[0-9]+)*)(?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>[0-9]+)?)?(?P<post>(?:-(?P<post_n1>[0-9]+))|(?:[-_.]?(?:post|rev|r)[-_.]?(?P<post_n2>[0-9]+)?))?(?P<dev>[-_.]?dev[-_.]?(?P<dev_n>[0-9]+)?)?)(?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?$",
        )
        .unwrap()
    })
}

/// A version broken into its PEP 440 segments, all pre-normalized.
struct ParsedVersion {
    epoch: String,
    release: Vec<String>,
    pre: Option<(String, String)>,
    post: Option<String>,
    dev: Option<String>,
    local: Option<String>,
}

impl ParsedVersion {
    fn parse(version: &str) -> Option<Self> {
        let captures = version_re().captures(version.trim())?;

        let epoch = captures
            .name("epoch")
            .map_or_else(|| "0".to_string(), |m| normalize_number(m.as_str()));
        let release = captures
            .name("release")?
            .as_str()
            .split('.')
            .map(normalize_number)
            .collect();
        let pre = captures.name("pre_l").map(|l| {
            let letter = match l.as_str().to_ascii_lowercase().as_str() {
                "alpha" => "a".to_string(),
                "beta" => "b".to_string(),
                "c" | "pre" | "preview" => "rc".to_string(),
                other => other.to_string(),
            };
            let number = captures
                .name("pre_n")
                .map_or_else(|| "0".to_string(), |m| normalize_number(m.as_str()));
            (letter, number)
        });
        let post = captures.name("post").and_then(|m| {
            if m.as_str().is_empty() {
                return None;
            }
            let number = captures
                .name("post_n1")
                .or_else(|| captures.name("post_n2"))
                .map_or_else(|| "0".to_string(), |m| normalize_number(m.as_str()));
            Some(number)
        });
        let dev = captures.name("dev").and_then(|m| {
            if m.as_str().is_empty() {
                return None;
            }
            let number = captures
                .name("dev_n")
                .map_or_else(|| "0".to_string(), |m| normalize_number(m.as_str()));
            Some(number)
        });
        let local = captures.name("local").map(|m| {
            m.as_str()
                .to_ascii_lowercase()
                .replace(['-', '_'], ".")
                .split('.')
                .map(normalize_local_segment)
                .collect::<Vec<_>>()
                .join(".")
        });

        Some(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    fn render(&self, strip_trailing_zeros: bool) -> String {
        let mut out = String::new();
        if self.epoch != "0" {
            out.push_str(&self.epoch);
            out.push('!');
        }
        let mut release = self.release.as_slice();
        if strip_trailing_zeros {
            let mut end = release.len();
            while end > 1 && release[end - 1] == "0" {
                end -= 1;
            }
            release = &release[..end];
        }
        out.push_str(&release.join("."));
        if let Some((letter, number)) = &self.pre {
            out.push_str(letter);
            out.push_str(number);
        }
        if let Some(number) = &self.post {
            out.push_str(".post");
            out.push_str(number);
        }
        if let Some(number) = &self.dev {
            out.push_str(".dev");
            out.push_str(number);
        }
        if let Some(local) = &self.local {
            out.push('+');
            out.push_str(local);
        }
        out
    }
}

/// Drop leading zeros from a numeric segment.
fn normalize_number(number: &str) -> String {
    let trimmed = number.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Numeric local segments lose their leading zeros, alphanumeric ones do not.
fn normalize_local_segment(segment: &str) -> String {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        normalize_number(segment)
    } else {
        segment.to_string()
    }
}

/// Canonicalize a version for comparison purposes.
///
/// Strips trailing zeros from the release segment, so `1.0.0`, `1.0` and `1`
/// all canonicalize to `1`. Strings that do not parse as versions are
/// returned unchanged.
pub fn canonicalize_version(version: &str) -> String {
    match ParsedVersion::parse(version) {
        Some(parsed) => parsed.render(true),
        None => version.to_string(),
    }
}

/// Sanitize a version into its normalized PEP 440 spelling, keeping trailing
/// zeros (`1.0.0` stays `1.0.0`).
///
/// Strings that do not parse fall back to a lossy cleanup: spaces become `.`
/// and any other run of illegal characters becomes `-`.
pub fn sanitize_version(version: &str) -> String {
    if let Some(parsed) = ParsedVersion::parse(version) {
        return parsed.render(false);
    }
    static FALLBACK_RE: OnceLock<Regex> = OnceLock::new();
    let illegal = FALLBACK_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9.]+").unwrap());
    illegal
        .replace_all(&version.trim().replace(' ', "."), "-")
        .into_owned()
}
