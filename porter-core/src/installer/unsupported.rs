use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::model::InstallerType;

use super::{InstallRequest, Manager};

/// Recognized formats that cannot be installed, e.g. `.deb` or `.rpm`.
pub struct UnsupportedManager;

#[async_trait]
impl Manager for UnsupportedManager {
    fn name(&self) -> InstallerType {
        InstallerType::Unsupported
    }

    async fn install(&self, request: &InstallRequest<'_>) -> Result<Vec<String>> {
        Err(PorterError::Unsupported(format!(
            "{} is not an installable format",
            request.source.display()
        )))
    }
}
