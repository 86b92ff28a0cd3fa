// porter-core/src/lib.rs

pub mod installer;
pub mod launch;
pub mod operation;
pub mod platform;
pub mod rpc;
pub mod runlock;

pub use installer::{ManagerRegistry, Sniffer};
pub use launch::{LauncherParams, LauncherRegistry};
pub use operation::{OperationDeps, OperationManager, OperationOutcome};
pub use rpc::{Conn, Peer};
pub use runlock::{RunLock, RunLockGuard};
