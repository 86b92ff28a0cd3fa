// porter-aio/src/extract.rs
// Archive extraction into an install folder. Extraction is synchronous and
// checks the cancellation token between entries, so callers run it on a
// blocking thread.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use porter_common::error::{PorterError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveFormat {
    /// Detects the format from the file name first, then from magic bytes.
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let by_name = if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".bz2")
        {
            Some(ArchiveFormat::TarBz2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") || name.ends_with(".xz") {
            Some(ArchiveFormat::TarXz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        };
        if let Some(format) = by_name {
            return Ok(format);
        }

        let head = crate::fs::read_head(path, 8192)?;
        match infer::get(&head).map(|k| k.mime_type()) {
            Some("application/zip") => Ok(ArchiveFormat::Zip),
            Some("application/gzip") => Ok(ArchiveFormat::TarGz),
            Some("application/x-bzip2") => Ok(ArchiveFormat::TarBz2),
            Some("application/x-xz") => Ok(ArchiveFormat::TarXz),
            Some("application/x-tar") => Ok(ArchiveFormat::Tar),
            other => Err(PorterError::Unsupported(format!(
                "cannot extract {} (detected type: {})",
                path.display(),
                other.unwrap_or("unknown")
            ))),
        }
    }
}

/// Extracts `archive_path` into `target_dir` and returns the written files,
/// relative to `target_dir` and `/`-separated, in archive order.
pub fn extract_archive(
    archive_path: &Path,
    target_dir: &Path,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    let format = ArchiveFormat::detect(archive_path)?;
    debug!(
        "Extracting archive '{}' ({:?}) to '{}'",
        archive_path.display(),
        format,
        target_dir.display()
    );
    crate::fs::create_dir_all(target_dir)?;

    let file = BufReader::new(File::open(archive_path)?);
    let files = match format {
        ArchiveFormat::Zip => extract_zip(file, target_dir, token)?,
        ArchiveFormat::Tar => extract_tar(file, target_dir, token)?,
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(file), target_dir, token)?,
        ArchiveFormat::TarBz2 => extract_tar(BzDecoder::new(file), target_dir, token)?,
        ArchiveFormat::TarXz => extract_tar(XzDecoder::new(file), target_dir, token)?,
    };
    debug!(
        "Finished extracting {} files from {}",
        files.len(),
        archive_path.display()
    );
    Ok(files)
}

/// Lists the regular files of an archive without extracting it.
pub fn list_archive(archive_path: &Path) -> Result<Vec<String>> {
    let format = ArchiveFormat::detect(archive_path)?;
    let file = BufReader::new(File::open(archive_path)?);
    match format {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(file)?;
            let mut names = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let entry = archive.by_index(i)?;
                if !entry.is_dir() {
                    if let Some(path) = entry.enclosed_name() {
                        names.push(slash_path(&path));
                    }
                }
            }
            Ok(names)
        }
        ArchiveFormat::Tar => list_tar(file),
        ArchiveFormat::TarGz => list_tar(GzDecoder::new(file)),
        ArchiveFormat::TarBz2 => list_tar(BzDecoder::new(file)),
        ArchiveFormat::TarXz => list_tar(XzDecoder::new(file)),
    }
}

fn extract_zip<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(reader)?;
    let mut written = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        if token.is_cancelled() {
            debug!("Extraction cancelled after {} entries", written.len());
            return Err(PorterError::Cancelled);
        }
        let mut entry = archive.by_index(i)?;
        let rel = entry.enclosed_name().ok_or_else(|| {
            error!("Unsafe path in ZIP entry {}", entry.name());
            PorterError::InstallError(format!("unsafe path in archive: {}", entry.name()))
        })?;
        let outpath = safe_join(target_dir, &rel)?;

        if entry.is_dir() {
            crate::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            crate::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                if let Err(e) =
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))
                {
                    warn!("Failed set permissions on {}: {}", outpath.display(), e);
                }
            }
        }
        written.push(slash_path(&rel));
    }
    Ok(written)
}

fn extract_tar<R: Read>(
    reader: R,
    target_dir: &Path,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut written = Vec::new();
    for entry in archive.entries()? {
        if token.is_cancelled() {
            debug!("Extraction cancelled after {} entries", written.len());
            return Err(PorterError::Cancelled);
        }
        let mut entry = entry?;
        let rel: PathBuf = entry.path()?.into_owned();
        // Validates the path; `unpack_in` does its own containment check.
        safe_join(target_dir, &rel)?;
        let is_file = entry.header().entry_type().is_file();
        if !entry.unpack_in(target_dir)? {
            warn!("Skipped TAR entry outside target: {}", rel.display());
            continue;
        }
        if is_file {
            written.push(slash_path(&rel));
        }
    }
    Ok(written)
}

fn list_tar<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(reader);
    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_file() {
            names.push(slash_path(&entry.path()?));
        }
    }
    Ok(names)
}

/// Joins an archive-relative path onto `base`, rejecting anything that could
/// escape it.
fn safe_join(base: &Path, rel: &Path) -> Result<PathBuf> {
    let mut out = base.to_path_buf();
    for comp in rel.components() {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            _ => {
                error!("Disallowed component {:?} in archive path {}", comp, rel.display());
                return Err(PorterError::InstallError(format!(
                    "unsafe path component in {}",
                    rel.display()
                )));
            }
        }
    }
    Ok(out)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_zip_and_reports_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        make_zip(&archive, &[("bin/game", b"elf"), ("data.pak", b"pak")]);
        let target = dir.path().join("install");

        let files = extract_archive(&archive, &target, &CancellationToken::new()).unwrap();
        assert_eq!(files, vec!["bin/game", "data.pak"]);
        assert_eq!(std::fs::read(target.join("bin/game")).unwrap(), b"elf");
        assert_eq!(list_archive(&archive).unwrap(), files);
    }

    #[test]
    fn cancelled_token_stops_before_the_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        make_zip(&archive, &[("a.txt", b"a")]);
        let token = CancellationToken::new();
        token.cancel();
        let err = extract_archive(&archive, &dir.path().join("out"), &token).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dir.path().join("out/a.txt").exists());
    }

    #[test]
    fn renamed_zip_is_detected_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("setup.exe");
        make_zip(&archive, &[("a.txt", b"a")]);
        assert_eq!(ArchiveFormat::detect(&archive).unwrap(), ArchiveFormat::Zip);
    }

    #[test]
    fn parent_components_are_rejected() {
        assert!(safe_join(Path::new("/t"), Path::new("../etc/passwd")).is_err());
        assert_eq!(
            safe_join(Path::new("/t"), Path::new("./a/b")).unwrap(),
            PathBuf::from("/t/a/b")
        );
    }
}
