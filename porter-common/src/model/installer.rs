use std::fmt;

use serde::{Deserialize, Serialize};

/// How an artifact gets turned into files inside an install folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerType {
    /// Extract the archive contents.
    Archive,
    /// Known format we refuse to handle.
    Unsupported,
    /// Apple disk image.
    Dmg,
    /// Microsoft installer package.
    Msi,
    /// Copy the file as-is.
    Naked,
}

impl InstallerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerType::Archive => "archive",
            InstallerType::Unsupported => "unsupported",
            InstallerType::Dmg => "dmg",
            InstallerType::Msi => "msi",
            InstallerType::Naked => "naked",
        }
    }
}

impl fmt::Display for InstallerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
