//! End-to-end tests of the resolve pipeline against a mock index proxy, a
//! fake artifact store and a stub git fetcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stash_client::{compute_checksum, ChecksumAlgorithm, ClientBuilder, Credentials};
use stash_mirror::{ArtifactStore, ComponentKind, StoreError};
use stash_pip::{
    Config, Error, FaultKind, GitFetchError, GitFetcher, Request, Resolver,
};

const GIT_REF: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

#[derive(Default)]
struct StoreState {
    /// `(repository, raw component name)` pairs that exist as raw assets.
    raw_assets: Mutex<HashMap<(String, String), ()>>,
    /// `(repository, sdist file name)` pairs uploaded as PyPI components.
    pypi_uploads: Mutex<Vec<(String, String)>>,
    /// `(repository, raw component name)` pairs uploaded as raw components.
    raw_uploads: Mutex<Vec<(String, String)>>,
    scripts: Mutex<Vec<String>>,
    asset_base: Mutex<String>,
}

/// An in-memory artifact store whose raw assets download from the mock
/// server's `/rawcache/` routes.
#[derive(Clone, Default)]
struct FakeStore {
    state: Arc<StoreState>,
}

impl FakeStore {
    fn with_asset_base(base: &str) -> Self {
        let store = Self::default();
        *store.state.asset_base.lock().unwrap() = base.to_string();
        store
    }

    fn seed_raw_asset(&self, repository: &str, name: &str) {
        self.state
            .raw_assets
            .lock()
            .unwrap()
            .insert((repository.to_string(), name.to_string()), ());
    }

    fn raw_uploads(&self) -> Vec<(String, String)> {
        self.state.raw_uploads.lock().unwrap().clone()
    }

    fn pypi_uploads(&self) -> Vec<(String, String)> {
        self.state.pypi_uploads.lock().unwrap().clone()
    }

    fn scripts(&self) -> Vec<String> {
        self.state.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn upload_pypi(&self, repository: &str, path: &Path) -> Result<(), StoreError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.state
            .pypi_uploads
            .lock()
            .unwrap()
            .push((repository.to_string(), filename));
        Ok(())
    }

    async fn upload_raw(
        &self,
        repository: &str,
        dest_dir: &str,
        filename: &str,
        _path: &Path,
    ) -> Result<(), StoreError> {
        let name = format!("{dest_dir}/{filename}");
        self.state
            .raw_uploads
            .lock()
            .unwrap()
            .push((repository.to_string(), name.clone()));
        self.state
            .raw_assets
            .lock()
            .unwrap()
            .insert((repository.to_string(), name), ());
        Ok(())
    }

    async fn raw_asset_url(&self, repository: &str, name: &str) -> Result<Option<Url>, StoreError> {
        let exists = self
            .state
            .raw_assets
            .lock()
            .unwrap()
            .contains_key(&(repository.to_string(), name.to_string()));
        if !exists {
            return Ok(None);
        }
        let base = self.state.asset_base.lock().unwrap().clone();
        let url = Url::parse(&format!("{base}/rawcache/{name}"))
            .map_err(|err| StoreError::with_source("bad asset URL", err))?;
        Ok(Some(url))
    }

    async fn component_exists(
        &self,
        _repository: &str,
        _kind: ComponentKind,
        _name: &str,
        _version: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn execute_script(
        &self,
        name: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.state.scripts.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct GitState {
    archive: Mutex<Option<PathBuf>>,
    calls: Mutex<Vec<(String, String)>>,
}

#[derive(Clone, Default)]
struct StubGit {
    state: Arc<GitState>,
}

impl StubGit {
    fn with_archive(archive: &Path) -> Self {
        let stub = Self::default();
        *stub.state.archive.lock().unwrap() = Some(archive.to_path_buf());
        stub
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.state.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitFetcher for StubGit {
    async fn fetch(&self, url: &str, reference: &str) -> Result<PathBuf, GitFetchError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push((url.to_string(), reference.to_string()));
        self.state
            .archive
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| GitFetchError::new("no archive configured for the stub"))
    }
}

/// A minimal valid sdist: a gzipped tar with `<root>/PKG-INFO`.
fn sdist_bytes(root: &str) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for member in [format!("{root}/PKG-INFO"), format!("{root}/setup.py")] {
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, member, &b""[..]).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

async fn sha256_of(bytes: &[u8]) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact");
    fs_err::write(&path, bytes).unwrap();
    compute_checksum(&path, ChecksumAlgorithm::Sha256)
        .await
        .unwrap()
}

fn write_project(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        fs_err::write(dir.path().join(name), content).unwrap();
    }
    dir
}

const SETUP_PY: &str = "from setuptools import setup\n\nsetup(name=\"myapp\", version=\"0.1.0\")\n";

fn config(server: &MockServer, bundles_dir: &Path) -> Config {
    Config {
        store_url: server.uri(),
        store_credentials: Credentials {
            username: "stash".to_string(),
            password: "hunter2".to_string(),
        },
        pypi_proxy_url: format!("{}/pypi-proxy", server.uri()),
        raw_cache_repo: "pip-raw".to_string(),
        request_repo_prefix: "stash-".to_string(),
        bundles_dir: bundles_dir.to_path_buf(),
        concurrency: 3,
    }
}

fn resolver(
    server: &MockServer,
    bundles_dir: &Path,
    store: &FakeStore,
    git: &StubGit,
) -> Resolver<FakeStore, StubGit> {
    Resolver::new(
        config(server, bundles_dir),
        ClientBuilder::new().retries(0).build().unwrap(),
        store.clone(),
        git.clone(),
    )
}

#[tokio::test]
async fn index_requirement_end_to_end() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let archive = sdist_bytes("requests-2.25.1");
    let digest = sha256_of(&archive).await;

    let index_page = format!(
        r#"<html><body>
          <a href="requests-2.25.1.tar.gz#sha256={digest}">requests-2.25.1.tar.gz</a>
          <a href="requests-2.25.0.tar.gz#sha256=aaaa">requests-2.25.0.tar.gz</a>
          <a href="requests-2.25.1.zip#sha256=bbbb" data-yanked="">requests-2.25.1.zip</a>
        </body></html>"#
    );
    Mock::given(method("GET"))
        .and(path("/pypi-proxy/simple/requests/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pypi-proxy/simple/requests/requests-2.25.1.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        (
            "requirements.txt",
            &format!("requests==2.25.1 --hash=sha256:{digest}\n"),
        ),
    ]);

    let resolved = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap();

    assert_eq!(resolved.root_package.name, "myapp");
    assert_eq!(resolved.root_package.version, "0.1.0");
    assert_eq!(resolved.dependencies.len(), 1);
    let dependency = &resolved.dependencies[0];
    assert_eq!(dependency.name, "requests");
    assert_eq!(dependency.version, "2.25.1");
    assert_eq!(dependency.package_type, "pip");
    assert!(!dependency.dev);

    // The artifact landed inside the request's deps/pip subtree.
    let expected = bundles
        .path()
        .join("temp/1/deps/pip/requests/requests-2.25.1.tar.gz");
    assert!(expected.is_file());

    // And was published into the request's hosted PyPI repository.
    assert_eq!(
        store.pypi_uploads(),
        vec![(
            "stash-pip-hosted-1".to_string(),
            "requests-2.25.1.tar.gz".to_string(),
        )],
    );
}

#[tokio::test]
async fn vcs_requirement_end_to_end() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());

    let archive_dir = tempfile::tempdir().unwrap();
    let archive_path = archive_dir.path().join("foo.tar.gz");
    fs_err::write(&archive_path, sdist_bytes("foo")).unwrap();
    let git = StubGit::with_archive(&archive_path);

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        (
            "requirements.txt",
            &format!("foo @ git+https://github.com/ns/foo.git@{GIT_REF}#egg=foo\n"),
        ),
    ]);

    let resolved = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap();

    // The git fetch primitive got the clean URL and the ref.
    assert_eq!(
        git.calls(),
        vec![(
            "https://github.com/ns/foo.git".to_string(),
            GIT_REF.to_string(),
        )],
    );

    let raw_name = format!("foo/foo-external-gitcommit-{GIT_REF}.tar.gz");
    let expected = bundles.path().join(format!(
        "temp/1/deps/pip/github.com/ns/foo/foo-external-gitcommit-{GIT_REF}.tar.gz"
    ));
    assert!(expected.is_file());

    // Mirrored into the shared raw cache and the request's raw repository.
    assert_eq!(
        store.raw_uploads(),
        vec![
            ("pip-raw".to_string(), raw_name.clone()),
            ("stash-pip-raw-1".to_string(), raw_name),
        ],
    );

    assert_eq!(
        resolved.dependencies[0].version,
        format!("git+https://github.com/ns/foo.git@{GIT_REF}"),
    );
}

#[tokio::test]
async fn url_requirement_end_to_end() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let archive = sdist_bytes("spam-1.0");
    let digest = sha256_of(&archive).await;
    Mock::given(method("GET"))
        .and(path("/files/spam-1.0.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let requirement_url = format!(
        "{}/files/spam-1.0.tar.gz#egg=spam&cachito_hash=sha256:{digest}",
        server.uri()
    );
    let project = write_project(&[
        ("setup.py", SETUP_PY),
        ("requirements.txt", &format!("spam @ {requirement_url}\n")),
    ]);

    let resolved = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap();

    // url_with_hash echoes the input URL, which already carried the hash.
    assert_eq!(resolved.dependencies[0].version, requirement_url);

    let expected = bundles.path().join(format!(
        "temp/1/deps/pip/external-spam/spam-external-sha256-{digest}.tar.gz"
    ));
    assert!(expected.is_file());
}

#[tokio::test]
async fn build_manifest_dependencies_are_dev() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let archive = sdist_bytes("wheelwright-1.0");
    let digest = sha256_of(&archive).await;
    let index_page = format!(
        r#"<a href="wheelwright-1.0.tar.gz#sha256={digest}">wheelwright-1.0.tar.gz</a>"#
    );
    Mock::given(method("GET"))
        .and(path("/pypi-proxy/simple/wheelwright/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pypi-proxy/simple/wheelwright/wheelwright-1.0.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        ("requirements-build.txt", "wheelwright==1.0\n"),
    ]);

    let resolved = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap();

    assert_eq!(resolved.dependencies.len(), 1);
    assert!(resolved.dependencies[0].dev);
    assert_eq!(
        resolved.manifest_paths,
        vec![project.path().join("requirements-build.txt")],
    );
}

#[tokio::test]
async fn require_hashes_without_hashes_is_a_validation_fault() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        ("requirements.txt", "--require-hashes\nrequests==2.25.1\n"),
    ]);

    let err = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FaultKind::Validation);
}

#[tokio::test]
async fn all_yanked_candidates_are_a_fetch_fault() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let index_page = r#"
      <a href="pkg-1.0.tar.gz#sha256=aaaa" data-yanked="">pkg-1.0.tar.gz</a>
      <a href="pkg-1.0.zip#sha256=bbbb" data-yanked="reason">pkg-1.0.zip</a>
    "#;
    Mock::given(method("GET"))
        .and(path("/pypi-proxy/simple/pkg/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(index_page))
        .mount(&server)
        .await;

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        ("requirements.txt", "pkg==1.0\n"),
    ]);

    let err = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllYanked { .. }), "{err}");
    assert_eq!(err.kind(), FaultKind::Fetch);
}

#[tokio::test]
async fn checksum_mismatch_is_a_fetch_fault() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    Mock::given(method("GET"))
        .and(path("/files/spam-1.0.tar.gz"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(sdist_bytes("spam-1.0")),
        )
        .mount(&server)
        .await;

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        (
            "requirements.txt",
            &format!(
                "spam @ {}/files/spam-1.0.tar.gz#egg=spam&cachito_hash=sha256:{}\n",
                server.uri(),
                "0".repeat(64),
            ),
        ),
    ]);

    let err = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 1 }, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FaultKind::Fetch);
}

/// Rerunning an identical manifest against a populated mirror issues zero
/// origin fetches: the artifact comes from the raw cache and the git
/// primitive is never called.
#[tokio::test]
async fn populated_mirror_preempts_origin_fetches() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let raw_name = format!("foo/foo-external-gitcommit-{GIT_REF}.tar.gz");
    store.seed_raw_asset("pip-raw", &raw_name);
    Mock::given(method("GET"))
        .and(path(format!("/rawcache/{raw_name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sdist_bytes("foo")))
        .expect(1)
        .mount(&server)
        .await;

    let project = write_project(&[
        ("setup.py", SETUP_PY),
        (
            "requirements.txt",
            &format!("foo @ git+https://github.com/ns/foo.git@{GIT_REF}#egg=foo\n"),
        ),
    ]);

    let resolved = resolver(&server, bundles.path(), &store, &git)
        .resolve(project.path(), &Request { id: 2 }, None, None)
        .await
        .unwrap();

    assert!(git.calls().is_empty());
    // Only the per-request repository sees an upload; the cache already had
    // the component.
    assert_eq!(
        store.raw_uploads(),
        vec![("stash-pip-raw-2".to_string(), raw_name)],
    );
    assert_eq!(resolved.dependencies.len(), 1);
}

#[tokio::test]
async fn prepare_and_finalize_drive_the_store_scripts() {
    let server = MockServer::start().await;
    let bundles = tempfile::tempdir().unwrap();
    let store = FakeStore::with_asset_base(&server.uri());
    let git = StubGit::default();

    let resolver = resolver(&server, bundles.path(), &store, &git);
    let request = Request { id: 7 };

    resolver.prepare_for_request(&request).await.unwrap();
    let access = resolver.finalize_for_request(&request).await.unwrap();

    assert_eq!(
        store.scripts(),
        vec![
            "pip_before_content_staged".to_string(),
            "pip_after_content_staged".to_string(),
        ],
    );
    assert_eq!(access.username, "stash-pip-7");
    assert!((24..=32).contains(&access.password.len()));
    assert!(access.password.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        access.index_url,
        format!(
            "{}/repository/stash-pip-hosted-7/simple",
            server.uri().replacen(
                "://",
                &format!("://stash-pip-7:{}@", access.password),
                1
            ),
        ),
    );
}
