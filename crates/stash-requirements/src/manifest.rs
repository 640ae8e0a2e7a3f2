use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::options::split_options_and_requirement;
use crate::requirement::Requirement;
use crate::Error;

/// Comment text: a `#` at the start of the line or after whitespace, through
/// the end of the line.
fn line_comment_re() -> &'static Regex {
    static LINE_COMMENT_RE: OnceLock<Regex> = OnceLock::new();
    LINE_COMMENT_RE.get_or_init(|| Regex::new(r"(^|\s)#.*$").unwrap())
}

/// A parsed requirements manifest: the global options and the requirements,
/// in file order.
///
/// Parsing happens once, up front; the document is immutable afterwards and
/// can be shared freely between concurrent fetch workers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementsFile {
    /// Where the manifest was read from, if it came from disk.
    pub path: Option<PathBuf>,
    /// Global options, in the order they appeared.
    pub options: Vec<String>,
    /// Requirements, in the order they appeared.
    pub requirements: Vec<Requirement>,
}

impl RequirementsFile {
    /// Read and parse a manifest from disk.
    pub fn parse(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = fs_err::read_to_string(path)?;
        let (options, requirements) = Self::parse_str(&content)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            options,
            requirements,
        })
    }

    /// Parse manifest text into `(global options, requirements)`.
    pub fn parse_str(content: &str) -> Result<(Vec<String>, Vec<Requirement>), Error> {
        let mut options = Vec::new();
        let mut requirements = Vec::new();

        for line in logical_lines(content) {
            let (global_options, requirement_options, requirement_line) =
                split_options_and_requirement(&line)?;
            options.extend(global_options);
            if !requirement_line.is_empty() {
                requirements.push(Requirement::from_line(
                    &requirement_line,
                    requirement_options,
                )?);
            }
        }

        Ok((options, requirements))
    }

    /// Build a manifest from already-parsed parts.
    pub fn from_parts(options: Vec<String>, requirements: Vec<Requirement>) -> Self {
        Self {
            path: None,
            options,
            requirements,
        }
    }

    /// Write the manifest back out, one requirement per line.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        fs_err::write(path, self.to_string())?;
        Ok(())
    }
}

impl Display for RequirementsFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.options.is_empty() {
            writeln!(f, "{}", self.options.join(" "))?;
        }
        for requirement in &self.requirements {
            writeln!(f, "{requirement}")?;
        }
        Ok(())
    }
}

/// Iterate the logical lines of a manifest: physical lines ending in `\` are
/// joined with the next line, then comments are stripped and blank results
/// skipped.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut buffer = String::new();

    let mut flush = |buffer: &mut String| {
        let line = line_comment_re().replace(buffer, "").trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
        buffer.clear();
    };

    for raw in content.lines() {
        if raw.ends_with('\\') {
            buffer.push_str(raw.trim_end_matches('\\'));
        } else {
            buffer.push_str(raw);
            flush(&mut buffer);
        }
    }
    // The last line may end in a continuation with nothing after it.
    if !buffer.is_empty() {
        flush(&mut buffer);
    }

    lines
}
