//! Post-download sanity check: a real sdist carries a `PKG-INFO` record.

use std::io::Read;
use std::path::Path;

use tracing::warn;

use stash_filename::SdistExtension;

use crate::Error;

/// Check that a downloaded sdist includes metadata, i.e. has a member at
/// `<root>/PKG-INFO`. `.tar.Z` archives are skipped: they are not
/// inspectable without external tooling.
pub(crate) async fn check_sdist_metadata(path: &Path) -> Result<(), Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || check_sync(&path))
        .await
        .map_err(|err| Error::Internal(format!("sdist inspection task failed: {err}")))?
}

fn check_sync(path: &Path) -> Result<(), Error> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = SdistExtension::from_path(&filename).map_err(|_| Error::Internal(format!(
        "cannot check metadata of {}, which does not have a known supported extension",
        path.display()
    )))?;

    let has_pkg_info = match extension {
        SdistExtension::Zip => zip_has_pkg_info(path)?,
        SdistExtension::TarZ => {
            warn!("Skip checking metadata from compressed sdist {filename}");
            return Ok(());
        }
        SdistExtension::TarGz | SdistExtension::TarBz2 | SdistExtension::TarXz
        | SdistExtension::Tar => tar_has_pkg_info(path, extension)?,
    };

    if has_pkg_info {
        Ok(())
    } else {
        Err(Error::MissingPkgInfo { path: filename })
    }
}

fn zip_has_pkg_info(path: &Path) -> Result<bool, Error> {
    let file = fs_err::File::open(path)?;
    let archive = zip::ZipArchive::new(file).map_err(|err| Error::InvalidArchive {
        path: path.display().to_string(),
        format: "Zip",
        source: Box::new(err),
    })?;
    let has_pkg_info = archive.file_names().any(is_pkg_info_path);
    Ok(has_pkg_info)
}

fn tar_has_pkg_info(path: &Path, extension: SdistExtension) -> Result<bool, Error> {
    let file = fs_err::File::open(path)?;
    let reader: Box<dyn Read> = match extension {
        SdistExtension::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
        SdistExtension::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
        SdistExtension::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
        _ => Box::new(file),
    };

    let invalid = |err: std::io::Error| Error::InvalidArchive {
        path: path.display().to_string(),
        format: "Tar",
        source: Box::new(err),
    };

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().map_err(invalid)? {
        let entry = entry.map_err(invalid)?;
        let entry_path = entry.path().map_err(invalid)?;
        if is_pkg_info_path(&entry_path.to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `<root>/PKG-INFO`: exactly two path components, the last being PKG-INFO.
fn is_pkg_info_path(path: &str) -> bool {
    let parts: Vec<&str> = path
        .trim_end_matches('/')
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    matches!(parts.as_slice(), [_, "PKG-INFO"])
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn write_tar_gz(path: &Path, members: &[&str]) {
        let file = fs_err::File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for member in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(0);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, member, &b""[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn write_zip(path: &Path, members: &[&str]) {
        let file = fs_err::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for member in members {
            writer.start_file(*member, options).unwrap();
            writer.write_all(b"").unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn tar_gz_with_pkg_info_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.tar.gz");
        write_tar_gz(&path, &["pkg-1.0/PKG-INFO", "pkg-1.0/setup.py"]);
        check_sdist_metadata(&path).await.unwrap();
    }

    #[tokio::test]
    async fn tar_gz_without_pkg_info_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.tar.gz");
        write_tar_gz(&path, &["pkg-1.0/setup.py"]);
        let err = check_sdist_metadata(&path).await.unwrap_err();
        assert!(matches!(err, Error::MissingPkgInfo { .. }), "{err}");
    }

    #[tokio::test]
    async fn deeply_nested_pkg_info_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.tar.gz");
        write_tar_gz(&path, &["pkg-1.0/sub/PKG-INFO"]);
        let err = check_sdist_metadata(&path).await.unwrap_err();
        assert!(matches!(err, Error::MissingPkgInfo { .. }), "{err}");
    }

    #[tokio::test]
    async fn zip_with_pkg_info_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.zip");
        write_zip(&path, &["pkg-1.0/PKG-INFO"]);
        check_sdist_metadata(&path).await.unwrap();
    }

    #[tokio::test]
    async fn garbage_archive_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0.zip");
        fs_err::write(&path, b"not an archive").unwrap();
        let err = check_sdist_metadata(&path).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArchive { .. }), "{err}");
    }

    #[test]
    fn pkg_info_path_shapes() {
        assert!(is_pkg_info_path("pkg-1.0/PKG-INFO"));
        assert!(is_pkg_info_path("./pkg-1.0/PKG-INFO"));
        assert!(!is_pkg_info_path("PKG-INFO"));
        assert!(!is_pkg_info_path("pkg-1.0/sub/PKG-INFO"));
        assert!(!is_pkg_info_path("pkg-1.0/setup.py"));
    }
}
