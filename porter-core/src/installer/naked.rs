use async_trait::async_trait;
use porter_common::error::{PorterError, Result, ResultExt};
use porter_common::model::InstallerType;
use tracing::debug;

use super::{bust_ghosts, InstallRequest, Manager};

/// Copies the artifact into the install folder unchanged.
pub struct NakedManager;

#[async_trait]
impl Manager for NakedManager {
    fn name(&self) -> InstallerType {
        InstallerType::Naked
    }

    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        if request.token.is_cancelled() {
            return Err(PorterError::Cancelled);
        }
        let name = request.source.file_name().ok_or_else(|| {
            PorterError::Validation(format!(
                "artifact path has no file name: {}",
                request.source.display()
            ))
        })?;
        let dest = request.install_folder.join(name);
        let source = request.source.to_path_buf();
        let copy_dest = dest.clone();
        let copied = tokio::task::spawn_blocking(move || {
            porter_aio::fs::atomic_copy_file(&source, &copy_dest)
        })
        .await
        .map_err(|e| PorterError::Generic(format!("copy task failed: {e}")))?
        .with_context(|| format!("copying {}", request.source.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(&dest) {
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o755);
                if let Err(e) = std::fs::set_permissions(&dest, perms) {
                    tracing::warn!("Could not mark {} executable: {}", dest.display(), e);
                }
            }
        }

        debug!("Installed naked file {} ({} bytes)", dest.display(), copied);
        let files = vec![name.to_string_lossy().to_string()];
        bust_ghosts(request.install_folder, request.receipt, &files);
        Ok(files)
    }
}
