// porter-common/src/lib.rs
pub mod config;
pub mod error;
pub mod model;
pub mod protocol;

// Re-export key types
pub use config::Config;
pub use error::{PorterError, Result, ResultExt};
pub use protocol::{ErrorCode, Notification};
