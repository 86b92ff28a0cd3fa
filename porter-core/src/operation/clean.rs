// Finds and removes leftover download folders.

use std::path::{Path, PathBuf};

use porter_common::error::Result;
use porter_common::protocol::CleanDownloadsEntry;
use tracing::{debug, info, warn};

fn whitelisted(path: &Path, whitelist: &[PathBuf]) -> bool {
    whitelist.iter().any(|w| {
        w == path || (w.components().count() == 1 && path.file_name() == Some(w.as_os_str()))
    })
}

/// Sub-folders of `roots` that are not whitelisted, with their sizes.
/// Missing roots are skipped.
pub fn search(roots: &[PathBuf], whitelist: &[PathBuf]) -> Result<Vec<CleanDownloadsEntry>> {
    let mut entries = Vec::new();
    for root in roots {
        if !root.is_dir() {
            debug!("Skipping missing downloads root {}", root.display());
            continue;
        }
        for (_, path, is_dir) in porter_aio::fs::list_directory_entries(root)? {
            if !is_dir || whitelisted(&path, whitelist) {
                continue;
            }
            let size = porter_aio::fs::dir_size(&path);
            entries.push(CleanDownloadsEntry { path, size });
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Removes every entry. Failures are logged and the rest still removed.
pub fn apply(entries: &[CleanDownloadsEntry]) -> usize {
    let mut removed = 0;
    for entry in entries {
        match porter_aio::fs::remove_directory_recursive(&entry.path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not remove {}: {}", entry.path.display(), e),
        }
    }
    info!("Removed {} of {} download folders", removed, entries.len());
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_skips_whitelist_and_apply_removes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("downloads");
        for name in ["keep", "stale-a", "stale-b"] {
            std::fs::create_dir_all(root.join(name)).unwrap();
            std::fs::write(root.join(name).join("blob"), vec![0u8; 10]).unwrap();
        }
        std::fs::write(root.join("loose-file"), b"x").unwrap();

        let whitelist = vec![PathBuf::from("keep")];
        let entries = search(&[root.clone(), dir.path().join("missing")], &whitelist).unwrap();
        let names: Vec<_> = entries
            .iter()
            .map(|e| e.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["stale-a", "stale-b"]);
        assert!(entries.iter().all(|e| e.size == 10));

        assert_eq!(apply(&entries), 2);
        assert!(root.join("keep").exists());
        assert!(!root.join("stale-a").exists());

        let full = vec![root.join("keep")];
        assert!(search(&[root], &full).unwrap().is_empty());
    }
}
