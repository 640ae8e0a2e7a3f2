use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The normalized name of a package.
///
/// Converts the name to lowercase and collapses any run of `-`, `_` and `.`
/// down to a single `-`, e.g. `---`, `.` and `__` all get converted to `-`.
///
/// See: <https://packaging.python.org/en/latest/specifications/name-normalization/>
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a validated, normalized package name.
    pub fn new(name: &str) -> Result<Self, InvalidNameError> {
        let Some(first) = name.chars().next() else {
            return Err(InvalidNameError::new(name));
        };
        let last = name.chars().last().unwrap();
        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            return Err(InvalidNameError::new(name));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(InvalidNameError::new(name));
        }

        let mut normalized = String::with_capacity(name.len());
        let mut last_was_separator = false;
        for c in name.chars() {
            if matches!(c, '-' | '_' | '.') {
                last_was_separator = true;
            } else {
                if last_was_separator {
                    normalized.push('-');
                    last_was_separator = false;
                }
                normalized.push(c.to_ascii_lowercase());
            }
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = InvalidNameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::new(name)
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The name is not a valid package name: it must start and end with an ASCII
/// letter or digit and contain only letters, digits, `-`, `_` and `.`.
#[derive(Debug, Clone, Error)]
#[error("Not a valid package name: {name}")]
pub struct InvalidNameError {
    name: String,
}

impl InvalidNameError {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}
