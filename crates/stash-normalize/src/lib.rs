//! Normalized spellings of Python package names and versions.
//!
//! Package names compare equal under the rules of PEP 503: case-insensitive,
//! with runs of `-`, `_` and `.` collapsed to a single `-`. Versions are
//! normalized per PEP 440, with a lossy fallback for strings that do not
//! parse as versions at all.

pub use package_name::{InvalidNameError, PackageName};
pub use version::{canonicalize_version, sanitize_version};

mod package_name;
mod version;
