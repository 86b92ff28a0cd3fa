use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::InstallerType;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{bust_ghosts, InstallRequest, Manager};

/// Seam over archive formats, so tests and platforms can swap extractors.
pub trait ArchiveExtractor: Send + Sync {
    fn list(&self, archive: &Path) -> Result<Vec<String>>;

    /// Extracts `archive` into `dest`, returning written files relative to
    /// `dest`. Stops with `Cancelled` between entries once `token` fires.
    fn extract(&self, archive: &Path, dest: &Path, token: &CancellationToken)
        -> Result<Vec<String>>;
}

/// zip and (compressed) tar support.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipTarExtractor;

impl ArchiveExtractor for ZipTarExtractor {
    fn list(&self, archive: &Path) -> Result<Vec<String>> {
        porter_aio::list_archive(archive)
    }

    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        porter_aio::extract_archive(archive, dest, token)
    }
}

pub struct ArchiveManager {
    extractor: Arc<dyn ArchiveExtractor>,
}

impl ArchiveManager {
    pub fn new(extractor: Arc<dyn ArchiveExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl Manager for ArchiveManager {
    fn name(&self) -> InstallerType {
        InstallerType::Archive
    }

    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        let extractor = Arc::clone(&self.extractor);
        let source = request.source.to_path_buf();
        let dest = request.install_folder.to_path_buf();
        let token = request.token.clone();

        let mut files = tokio::task::spawn_blocking(move || {
            let listing = extractor.list(&source)?;
            if listing.is_empty() {
                return Err(PorterError::InstallError(format!(
                    "{} contains no files",
                    source.display()
                )));
            }
            debug!(
                "Extracting {} entries from {} into {}",
                listing.len(),
                source.display(),
                dest.display()
            );
            extractor.extract(&source, &dest, &token)
        })
        .await
        .map_err(|e| PorterError::Generic(format!("extraction task failed: {e}")))?
        .with_context(|| format!("extracting {}", request.source.display()))?;

        files.sort();
        files.dedup();
        bust_ghosts(request.install_folder, request.receipt, &files);
        info!(
            "Extracted {} files into {}",
            files.len(),
            request.install_folder.display()
        );
        Ok(files)
    }
}
