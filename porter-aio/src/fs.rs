// porter-aio/src/fs.rs
// Filesystem primitives shared by the lock, installers and launcher.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use porter_common::error::{PorterError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        PorterError::from(e)
    })
}

/// Removes a file. A missing file is not an error.
pub fn remove_file(path: &Path) -> Result<()> {
    debug!("Removing file: {}", path.display());
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove file {}: {}", path.display(), e);
            Err(PorterError::from(e))
        }
    }
}

/// Removes a directory and all its contents. A missing directory is not an error.
pub fn remove_directory_recursive(path: &Path) -> Result<()> {
    debug!("Removing directory recursively: {}", path.display());
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed remove dir_all {}: {}", path.display(), e);
            Err(PorterError::from(e))
        }
    }
}

/// Removes empty directories from `start` upwards, stopping at `stop` (exclusive).
pub fn remove_empty_parents(start: &Path, stop: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }
        // Fails on non-empty dirs, which ends the walk.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        debug!("Removed empty directory {}", dir.display());
        current = dir.parent();
    }
}

/// Reads the entire contents of a file into a byte vector.
pub fn read_to_bytes(path: &Path) -> Result<Vec<u8>> {
    debug!("Reading file to bytes: {}", path.display());
    fs::read(path).map_err(PorterError::from)
}

/// Reads at most `len` bytes from the start of a file, for content sniffing.
pub fn read_head(path: &Path, len: usize) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Atomically writes data to a file using a temporary file in the same directory.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        PorterError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;
    create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_file.path().display()
    );

    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file over {}: {}",
            original_path.display(),
            e.error
        );
        PorterError::Io(Arc::new(e.error))
    })?;
    Ok(())
}

/// Copies `src` to `dest` through a temp file next to `dest`, so readers
/// never observe a half-written file. Returns the number of bytes copied.
pub fn atomic_copy_file(src: &Path, dest: &Path) -> Result<u64> {
    let dir = dest.parent().ok_or_else(|| {
        PorterError::Generic(format!("Cannot get parent directory for {}", dest.display()))
    })?;
    create_dir_all(dir)?;

    let mut reader = File::open(src)?;
    let mut temp_file = NamedTempFile::new_in(dir)?;
    let copied = io::copy(&mut reader, &mut temp_file)?;
    temp_file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        if let Ok(meta) = fs::metadata(src) {
            if let Err(e) = fs::set_permissions(temp_file.path(), meta.permissions()) {
                warn!("Failed to carry permissions to {}: {}", dest.display(), e);
            }
        }
    }

    temp_file
        .persist(dest)
        .map_err(|e| PorterError::Io(Arc::new(e.error)))?;
    debug!("Copied {} bytes {} -> {}", copied, src.display(), dest.display());
    Ok(copied)
}

/// Total size in bytes of every regular file under `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", path.display(), err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Lists directory entries as `(name, path, is_dir)`. Entries that fail to
/// read are skipped with a warning.
pub fn list_directory_entries(dir_path: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    debug!("Listing directory entries for: {}", dir_path.display());
    let read_dir = fs::read_dir(dir_path).map_err(|e| {
        error!("Failed to read directory {}: {}", dir_path.display(), e);
        PorterError::from(e)
    })?;

    let mut entries = Vec::new();
    for entry_res in read_dir {
        let entry = match entry_res {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error reading entry in {}: {}", dir_path.display(), e);
                continue;
            }
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(file_type) => entries.push((
                entry.file_name().to_string_lossy().to_string(),
                path,
                file_type.is_dir(),
            )),
            Err(e) => warn!("Failed to get file type for {}: {}", path.display(), e),
        }
    }
    Ok(entries)
}

/// Turns `path` into a `/`-separated path relative to `base`, or `None`
/// when `path` is not inside `base`.
pub fn relative_slash_path(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// --- Async variants ---

pub async fn create_dir_all_async(path: &Path) -> Result<()> {
    debug!("Async Creating directory recursively: {}", path.display());
    tokio::fs::create_dir_all(path)
        .await
        .map_err(PorterError::from)
}

pub async fn remove_directory_recursive_async(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_directory_recursive(&path))
        .await
        .map_err(|e| PorterError::Generic(format!("JoinError removing directory: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removals_tolerate_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(remove_file(&missing).is_ok());
        assert!(remove_directory_recursive(&missing).is_ok());
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        atomic_write_file(&path, b"one").unwrap();
        atomic_write_file(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn empty_parents_are_pruned_up_to_the_stop_dir() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(dir.path().join("a/keep.txt"), b"x").unwrap();
        remove_empty_parents(&deep, dir.path());
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let base = Path::new("/games/foo");
        assert_eq!(
            relative_slash_path(base, Path::new("/games/foo/data/level1.pak")),
            Some("data/level1.pak".to_string())
        );
        assert_eq!(relative_slash_path(base, Path::new("/elsewhere")), None);
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("x/a"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("b"), vec![0u8; 5]).unwrap();
        assert_eq!(dir_size(dir.path()), 15);
    }
}
