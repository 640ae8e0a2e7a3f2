use std::path::{Path, PathBuf};

/// The directory tree for a request, rooted at `<bundles>/temp/<id>`.
///
/// Owned exclusively by the request's worker task; created on demand and
/// disposed of by the surrounding request lifecycle.
#[derive(Debug, Clone)]
pub struct BundleDir {
    root: PathBuf,
}

impl BundleDir {
    pub fn new(bundles_dir: &Path, request_id: u64) -> Self {
        Self {
            root: bundles_dir.join("temp").join(request_id.to_string()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Where the application source is unpacked.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join("app")
    }

    pub fn deps_dir(&self) -> PathBuf {
        self.root.join("deps")
    }

    /// The subtree all pip artifacts are materialized under.
    pub fn pip_deps_dir(&self) -> PathBuf {
        self.root.join("deps").join("pip")
    }
}
