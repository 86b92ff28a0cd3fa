// Windows installer packages, installed quietly into the install folder.

use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::model::InstallerType;

use super::{InstallRequest, Manager};

pub struct MsiManager;

#[async_trait]
impl Manager for MsiManager {
    fn name(&self) -> InstallerType {
        InstallerType::Msi
    }

    #[cfg(windows)]
    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        use porter_aio::run_command_async;
        use tracing::{debug, error};

        use crate::installer::{bust_ghosts, collect_files};

        if request.token.is_cancelled() {
            return Err(PorterError::Cancelled);
        }
        porter_aio::fs::create_dir_all_async(request.install_folder).await?;
        let args = vec![
            "/i".to_string(),
            request.source.to_string_lossy().to_string(),
            "/qn".to_string(),
            "/norestart".to_string(),
            format!("TARGETDIR={}", request.install_folder.display()),
        ];
        debug!("Running msiexec {:?}", args);
        let output = run_command_async("msiexec", &args, None, None).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("msiexec failed with {}: {}", output.status, stderr);
            return Err(PorterError::InstallError(format!(
                "msiexec exited with {} for {}",
                output.status,
                request.source.display()
            )));
        }

        let files = collect_files(request.install_folder);
        bust_ghosts(request.install_folder, request.receipt, &files);
        Ok(files)
    }

    #[cfg(not(windows))]
    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        Err(PorterError::Unsupported(format!(
            "MSI packages can only be installed on Windows ({})",
            request.source.display()
        )))
    }
}
