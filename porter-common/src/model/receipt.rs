use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InstallerType;

/// Record of a previous install, stored inside the install folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Installed paths, relative to the install folder, `/`-separated.
    pub files: Vec<String>,
    pub installer_name: InstallerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<i64>,
    pub installed_at: DateTime<Utc>,
}

impl Receipt {
    /// Whether this receipt describes the same upload/build as the arguments.
    pub fn matches(&self, upload_id: i64, build_id: Option<i64>) -> bool {
        self.upload_id == Some(upload_id) && self.build_id == build_id
    }
}
