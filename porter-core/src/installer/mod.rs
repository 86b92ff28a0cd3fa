// porter-core/src/installer/mod.rs
// Turns a downloaded artifact into files inside an install folder.

pub mod archive;
pub mod classify;
pub mod dmg;
pub mod msi;
pub mod naked;
pub mod registry;
pub mod unsupported;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use porter_common::config::Config;
use porter_common::error::{Result, ResultExt};
use porter_common::model::{InstallerType, Receipt, META_DIR};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use archive::{ArchiveExtractor, ArchiveManager, ZipTarExtractor};
pub use classify::{classify, InferSniffer, Sniffer, EXTENSION_TABLE};
pub use dmg::DmgManager;
pub use msi::MsiManager;
pub use naked::NakedManager;
pub use registry::ManagerRegistry;
pub use unsupported::UnsupportedManager;

/// Inputs of [`Manager::install`].
pub struct InstallRequest<'a> {
    /// The downloaded artifact.
    pub source: &'a Path,
    pub install_folder: &'a Path,
    /// Receipt of the previous install, if any.
    pub receipt: Option<&'a Receipt>,
    pub token: &'a CancellationToken,
}

#[async_trait]
pub trait Manager: Send + Sync {
    fn name(&self) -> InstallerType;

    /// Installs `source` and returns the installed files, relative to the
    /// install folder. Re-running with the same receipt must converge on the
    /// same file set.
    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>>;

    /// Removes an install. Nothing to remove is success.
    async fn uninstall(&self, install_folder: &Path, receipt: Option<&Receipt>) -> Result<()> {
        uninstall_folder(install_folder, receipt).await
    }
}

/// Reads `.itch/receipt.json`. A corrupt receipt is logged and ignored.
pub fn read_receipt(install_folder: &Path) -> Result<Option<Receipt>> {
    let path = Config::receipt_path(install_folder);
    match porter_aio::json_io::read_json_opt::<Receipt>(&path) {
        Ok(receipt) => Ok(receipt),
        Err(e) if matches!(e.root(), porter_common::PorterError::Json(_)) => {
            warn!("Ignoring unreadable receipt {}: {}", path.display(), e);
            Ok(None)
        }
        Err(e) => Err(e.context(format!("reading receipt {}", path.display()))),
    }
}

pub fn write_receipt(install_folder: &Path, receipt: &Receipt) -> Result<()> {
    let path = Config::receipt_path(install_folder);
    porter_aio::json_io::write_json_sync(&path, receipt)
        .with_context(|| format!("writing receipt {}", path.display()))
}

/// Removes files the previous install had but the new one does not.
pub fn bust_ghosts(install_folder: &Path, previous: Option<&Receipt>, current: &[String]) {
    let Some(previous) = previous else {
        return;
    };
    let keep: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut busted = 0usize;
    for ghost in previous.files.iter().filter(|f| !keep.contains(f.as_str())) {
        if is_meta_path(ghost) {
            continue;
        }
        let path = install_folder.join(ghost);
        match porter_aio::fs::remove_file(&path) {
            Ok(()) => {
                busted += 1;
                if let Some(parent) = path.parent() {
                    porter_aio::fs::remove_empty_parents(parent, install_folder);
                }
            }
            Err(e) => warn!("Could not remove ghost file {}: {}", path.display(), e),
        }
    }
    if busted > 0 {
        info!("Removed {} ghost files from {}", busted, install_folder.display());
    }
}

/// Every regular file under `install_folder`, relative and `/`-separated,
/// skipping the metadata folder.
pub fn collect_files(install_folder: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(install_folder)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| porter_aio::fs::relative_slash_path(install_folder, entry.path()))
        .filter(|rel| !is_meta_path(rel))
        .collect();
    files.sort();
    files
}

fn is_meta_path(rel: &str) -> bool {
    rel == META_DIR || rel.starts_with(&format!("{META_DIR}/"))
}

/// Generic uninstall: removes every receipt-listed file, then the folder.
pub async fn uninstall_folder(install_folder: &Path, receipt: Option<&Receipt>) -> Result<()> {
    if !tokio::fs::try_exists(install_folder).await.unwrap_or(false) {
        debug!("{} already gone, nothing to uninstall", install_folder.display());
        return Ok(());
    }
    if let Some(receipt) = receipt {
        debug!(
            "Removing {} receipt files from {}",
            receipt.files.len(),
            install_folder.display()
        );
        for rel in &receipt.files {
            porter_aio::fs::remove_file(&install_folder.join(rel))?;
        }
    }
    porter_aio::fs::remove_directory_recursive_async(install_folder)
        .await
        .with_context(|| format!("removing {}", install_folder.display()))?;
    info!("Uninstalled {}", install_folder.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn receipt(files: &[&str]) -> Receipt {
        Receipt {
            files: files.iter().map(|s| s.to_string()).collect(),
            installer_name: InstallerType::Archive,
            upload_id: Some(1),
            build_id: None,
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn ghosts_are_removed_and_survivors_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("old")).unwrap();
        std::fs::write(root.join("old/gone.dat"), b"x").unwrap();
        std::fs::write(root.join("kept.dat"), b"x").unwrap();

        let prev = receipt(&["old/gone.dat", "kept.dat"]);
        bust_ghosts(root, Some(&prev), &["kept.dat".to_string()]);

        assert!(!root.join("old").exists());
        assert!(root.join("kept.dat").exists());
    }

    #[tokio::test]
    async fn uninstall_twice_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("game");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("game.exe"), b"MZ").unwrap();
        let r = receipt(&["game.exe"]);

        uninstall_folder(&folder, Some(&r)).await.unwrap();
        assert!(!folder.exists());
        uninstall_folder(&folder, Some(&r)).await.unwrap();
        uninstall_folder(&folder, None).await.unwrap();
    }

    #[test]
    fn receipts_round_trip_and_corruption_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_receipt(dir.path()).unwrap().is_none());

        let r = receipt(&["a", "b/c"]);
        write_receipt(dir.path(), &r).unwrap();
        assert_eq!(read_receipt(dir.path()).unwrap(), Some(r));

        std::fs::write(Config::receipt_path(dir.path()), b"garbage").unwrap();
        assert!(read_receipt(dir.path()).unwrap().is_none());
    }
}
