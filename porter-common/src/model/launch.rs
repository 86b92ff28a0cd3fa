use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Credentials;

/// Detected category of a launch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flavor {
    NativeWindows,
    NativeLinux,
    NativeMacos,
    /// LÖVE game bundle, run through the `love` interpreter.
    Love,
    /// Java archive, run through `java -jar`.
    Jar,
    Html,
    Script,
    Unknown,
}

impl Flavor {
    /// Interpreter that hosts targets of this flavor, with the arguments
    /// that go before the target path.
    pub fn interpreter(&self) -> Option<(&'static str, &'static [&'static str])> {
        match self {
            Flavor::Love => Some(("love", &[])),
            Flavor::Jar => Some(("java", &["-jar"])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeInfo {
    pub arch: String,
    /// `console`, `windows`, or another raw subsystem name.
    pub subsystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCandidate {
    /// Target path, relative to the install folder when possible.
    pub path: PathBuf,
    pub flavor: Flavor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pe_info: Option<PeInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStrategy {
    #[default]
    Native,
    Html,
    Url,
    Shell,
}

impl fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LaunchStrategy::Native => "native",
            LaunchStrategy::Html => "html",
            LaunchStrategy::Url => "url",
            LaunchStrategy::Shell => "shell",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
}

/// Platform the agent runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    pub platform: Platform,
    pub is64: bool,
}

impl Runtime {
    pub fn current() -> Self {
        let platform = if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        };
        Self {
            platform,
            is64: cfg!(target_pointer_width = "64"),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.platform == Platform::Windows
    }
}

/// `Launch` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchParams {
    pub install_folder: PathBuf,
    /// Absolute, or relative to `install_folder`. For `url` launches this is
    /// ignored in favor of `url`.
    #[serde(default)]
    pub target: PathBuf,
    #[serde(default)]
    pub strategy: LaunchStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<LaunchCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Redistributables the target needs, by name.
    #[serde(default)]
    pub prereqs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prereqs_dir: Option<PathBuf>,
    #[serde(default)]
    pub force_prereqs: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl LaunchParams {
    /// Target path made absolute against the install folder.
    pub fn full_target_path(&self) -> PathBuf {
        if self.target.is_absolute() {
            self.target.clone()
        } else {
            self.install_folder.join(&self.target)
        }
    }
}
