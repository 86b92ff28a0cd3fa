// Apple disk images: mount read-only, mirror the volume, detach.

use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::model::InstallerType;

use super::{InstallRequest, Manager};

pub struct DmgManager;

#[async_trait]
impl Manager for DmgManager {
    fn name(&self) -> InstallerType {
        InstallerType::Dmg
    }

    #[cfg(target_os = "macos")]
    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        macos::install(request).await
    }

    #[cfg(not(target_os = "macos"))]
    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        Err(PorterError::Unsupported(format!(
            "disk images can only be installed on macOS ({})",
            request.source.display()
        )))
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::path::Path;

    use porter_aio::run_command_async;
    use tracing::{debug, error, warn};

    use super::*;
    use crate::installer::{bust_ghosts, collect_files};

    pub(super) async fn install(request: &InstallRequest<'_>) -> Result<Vec<String>> {
        if request.token.is_cancelled() {
            return Err(PorterError::Cancelled);
        }
        let mount_dir = tempfile::Builder::new().prefix("porter-dmg").tempdir()?;
        let mount_point = mount_dir.path();
        attach(request.source, mount_point).await?;

        let copied = copy_volume(mount_point, request.install_folder).await;
        if let Err(e) = detach(mount_point).await {
            warn!("Could not detach {}: {}", mount_point.display(), e);
        }
        copied?;

        let files = collect_files(request.install_folder);
        bust_ghosts(request.install_folder, request.receipt, &files);
        Ok(files)
    }

    async fn attach(image: &Path, mount_point: &Path) -> Result<()> {
        debug!("Mounting {} at {}", image.display(), mount_point.display());
        let args = vec![
            "attach".to_string(),
            "-nobrowse".to_string(),
            "-readonly".to_string(),
            "-noautoopen".to_string(),
            "-mountpoint".to_string(),
            mount_point.to_string_lossy().to_string(),
            image.to_string_lossy().to_string(),
        ];
        let output = run_command_async("hdiutil", &args, None, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("hdiutil attach failed for {}: {}", image.display(), stderr);
            return Err(PorterError::InstallError(format!(
                "failed to mount {}: {}",
                image.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn copy_volume(mount_point: &Path, dest: &Path) -> Result<()> {
        porter_aio::fs::create_dir_all_async(dest).await?;
        let args = vec![
            mount_point.to_string_lossy().to_string(),
            dest.to_string_lossy().to_string(),
        ];
        let output = run_command_async("ditto", &args, None, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PorterError::InstallError(format!(
                "failed to copy disk image contents: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn detach(mount_point: &Path) -> Result<()> {
        let args = vec![
            "detach".to_string(),
            "-force".to_string(),
            mount_point.to_string_lossy().to_string(),
        ];
        let output = run_command_async("hdiutil", &args, None, None).await?;
        if !output.status.success() {
            return Err(PorterError::Generic(format!(
                "hdiutil detach exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn refused_off_macos() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("game.dmg");
        std::fs::write(&image, b"koly").unwrap();
        let err = DmgManager
            .install(&InstallRequest {
                source: &image,
                install_folder: &dir.path().join("out"),
                receipt: None,
                token: &CancellationToken::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::Unsupported(_)));
    }
}
