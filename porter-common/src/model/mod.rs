// porter-common/src/model/mod.rs
// Data model shared by the core pipeline and the protocol schema.

pub mod installer;
pub mod launch;
pub mod operation;
pub mod prereq;
pub mod receipt;
pub mod task;

// Re-export
pub use installer::InstallerType;
pub use launch::{
    Flavor, LaunchCandidate, LaunchParams, LaunchStrategy, PeInfo, Platform, Runtime,
};
pub use operation::{
    Credentials, InstallParams, OperationKind, OperationStartParams, UninstallParams, Upload,
};
pub use prereq::{PrereqStatus, PrereqTask};
pub use receipt::Receipt;
pub use task::{Task, TaskReason, TaskStatus, TaskType};

/// Name of the per-install metadata folder.
pub const META_DIR: &str = ".itch";
