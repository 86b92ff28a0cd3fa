use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PorterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Install,
    Uninstall,
}

/// Server / API-key / download-key triple authorizing network calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub server: Option<String>,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_key: Option<i64>,
}

/// One downloadable file of a package, as known by the client's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: i64,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Remote location; absent when `local_path` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Already-downloaded artifact, skips the download task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallParams {
    /// Absolute path where the package is installed.
    pub install_folder: PathBuf,
    /// Which upload to install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Upload>,
    /// Candidates to pick from when `upload` is not set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<Upload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Never run platform installers, treat everything as archive or naked.
    #[serde(default)]
    pub ignore_installers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallParams {
    pub install_folder: PathBuf,
}

/// `Operation.Start` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStartParams {
    /// Client-generated unique id, used to cancel the operation.
    pub id: String,
    /// Scratch space for partial downloads.
    pub staging_folder: PathBuf,
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_params: Option<InstallParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_params: Option<UninstallParams>,
}

impl OperationStartParams {
    /// Checks that exactly the parameter set matching `operation` is present
    /// and that the staging folder stays clear of the install folder.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PorterError::Validation("operation id must be set".into()));
        }
        if self.staging_folder.as_os_str().is_empty() {
            return Err(PorterError::Validation(
                "staging folder must be set".into(),
            ));
        }
        let install_folder = match (
            self.operation,
            self.install_params.as_ref(),
            self.uninstall_params.as_ref(),
        ) {
            (OperationKind::Install, Some(install), None) => {
                if install.install_folder.as_os_str().is_empty() {
                    return Err(PorterError::Validation(
                        "installParams.installFolder must be set".into(),
                    ));
                }
                if install.upload.is_none() && install.uploads.is_empty() {
                    return Err(PorterError::Validation(
                        "installParams needs an upload or a list of uploads".into(),
                    ));
                }
                &install.install_folder
            }
            (OperationKind::Uninstall, None, Some(uninstall)) => {
                if uninstall.install_folder.as_os_str().is_empty() {
                    return Err(PorterError::Validation(
                        "uninstallParams.installFolder must be set".into(),
                    ));
                }
                &uninstall.install_folder
            }
            (kind, install, uninstall) => return Err(PorterError::Validation(format!(
                "operation {:?} requires exactly its own parameters (installParams: {}, uninstallParams: {})",
                kind,
                if install.is_some() { "set" } else { "missing" },
                if uninstall.is_some() { "set" } else { "missing" },
            ))),
        };

        // The staging folder is wiped once the operation ends.
        if self.staging_folder.starts_with(install_folder)
            || install_folder.starts_with(&self.staging_folder)
        {
            return Err(PorterError::Validation(format!(
                "staging folder {} overlaps install folder {}",
                self.staging_folder.display(),
                install_folder.display()
            )));
        }
        Ok(())
    }

    /// Install folder the operation mutates.
    pub fn install_folder(&self) -> Option<&PathBuf> {
        match self.operation {
            OperationKind::Install => self.install_params.as_ref().map(|p| &p.install_folder),
            OperationKind::Uninstall => {
                self.uninstall_params.as_ref().map(|p| &p.install_folder)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> Upload {
        Upload {
            id: 12,
            filename: "game.zip".into(),
            display_name: None,
            size: Some(1024),
            url: Some("https://example.org/game.zip".into()),
            local_path: None,
            build_id: None,
        }
    }

    fn install_start() -> OperationStartParams {
        OperationStartParams {
            id: "op-1".into(),
            staging_folder: PathBuf::from("/tmp/staging"),
            operation: OperationKind::Install,
            install_params: Some(InstallParams {
                install_folder: PathBuf::from("/games/foo"),
                upload: Some(upload()),
                uploads: vec![],
                credentials: None,
                ignore_installers: false,
            }),
            uninstall_params: None,
        }
    }

    #[test]
    fn matching_params_validate() {
        assert!(install_start().validate().is_ok());
    }

    #[test]
    fn both_param_sets_are_rejected() {
        let mut params = install_start();
        params.uninstall_params = Some(UninstallParams {
            install_folder: PathBuf::from("/games/foo"),
        });
        assert!(matches!(params.validate(), Err(PorterError::Validation(_))));
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let mut params = install_start();
        params.operation = OperationKind::Uninstall;
        assert!(matches!(params.validate(), Err(PorterError::Validation(_))));
    }

    #[test]
    fn missing_id_is_rejected() {
        let mut params = install_start();
        params.id = "  ".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn overlapping_staging_and_install_folders_are_rejected() {
        for staging in ["/games/foo", "/games/foo/", "/games/foo/.staging", "/games"] {
            let mut params = install_start();
            params.staging_folder = PathBuf::from(staging);
            assert!(
                matches!(params.validate(), Err(PorterError::Validation(_))),
                "{staging} was accepted"
            );
        }

        let mut params = install_start();
        params.staging_folder = PathBuf::from("/games/foo-staging");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn wire_names_are_camel_case() {
        let json = serde_json::to_value(install_start()).unwrap();
        assert_eq!(json["stagingFolder"], "/tmp/staging");
        assert_eq!(json["operation"], "install");
        assert_eq!(json["installParams"]["installFolder"], "/games/foo");
        assert!(json.get("uninstallParams").is_none());
    }
}
