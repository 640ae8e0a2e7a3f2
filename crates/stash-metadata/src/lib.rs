//! Project identity extraction for Python source trees.
//!
//! The name and version of a project live in its build configuration, which
//! is not safely executable. `setup.py` is consulted first, through a
//! restricted walk of its AST that only resolves literal expressions and
//! simple variable assignments; `setup.cfg` fills in whatever is still
//! missing, including its `file:` and `attr:` version directives.

use std::path::Path;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::setup_cfg::SetupCfg;

mod literal;
mod setup_cfg;
mod setup_py;

/// The resolved identity of the top-level project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Neither `setup.py` nor `setup.cfg` yielded the field(s).
    #[error("Could not resolve package metadata: {}", missing.join(", "))]
    Unresolved { missing: Vec<&'static str> },

    /// A `file:` or `attr:` directive pointed outside the project directory.
    #[error("`{path}` is not a subpath of `{root}`")]
    PathEscape { path: String, root: String },

    #[error("`{0}` is not an accepted module name")]
    InvalidModuleName(String),
}

/// Attempt to get the name and version of a Python project.
///
/// First, parse the `setup.py` script (if present) and extract name and
/// version from keyword arguments to the `setup()` call. If either could not
/// be resolved and there is a `setup.cfg` file, fill in the missing values
/// from `metadata.name` and `metadata.version` in the config file.
pub fn extract_metadata(package_dir: &Path) -> Result<ProjectMetadata, Error> {
    let mut name = None;
    let mut version = None;

    let setup_py = package_dir.join("setup.py");
    if setup_py.is_file() {
        info!("Extracting metadata from setup.py");
        let source = fs_err::read_to_string(&setup_py)?;
        let extracted = setup_py::extract(&source);
        name = extracted.name;
        version = extracted.version;
    } else {
        warn!(
            "No setup.py found in directory {}, package is likely not pip compatible",
            package_dir.display()
        );
    }

    if name.is_none() || version.is_none() {
        if let Some(setup_cfg) = SetupCfg::load(package_dir) {
            info!("Filling in missing metadata from setup.cfg");
            if name.is_none() {
                name = setup_cfg.name();
            }
            if version.is_none() {
                version = setup_cfg.version()?;
            }
        }
    }

    let mut missing = Vec::new();
    match &name {
        Some(name) => info!("Resolved package name: {name:?}"),
        None => {
            error!("Could not resolve package name");
            missing.push("name");
        }
    }
    match &version {
        Some(version) => info!("Resolved package version: {version:?}"),
        None => {
            error!("Could not resolve package version");
            missing.push("version");
        }
    }

    match (name, version) {
        (Some(name), Some(version)) => Ok(ProjectMetadata { name, version }),
        _ => Err(Error::Unresolved { missing }),
    }
}
