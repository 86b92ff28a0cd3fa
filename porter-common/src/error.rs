use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::ErrorCode;

#[derive(Error, Debug, Clone)]
pub enum PorterError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Archive Error: {0}")]
    Archive(#[from] Arc<zip::result::ZipError>),

    #[error("Object File Error: {0}")]
    Object(#[from] Arc<object::read::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Operation already in progress: {0}")]
    OperationInProgress(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Network disconnected: {0}")]
    NetworkDisconnected(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Exit code 0x{code:x} ({signed_code}) for ({target})")]
    ProcessExit {
        code: u32,
        signed_code: i64,
        target: String,
    },

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Arc<PorterError>,
    },
}

impl From<std::io::Error> for PorterError {
    fn from(err: std::io::Error) -> Self {
        PorterError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for PorterError {
    fn from(err: reqwest::Error) -> Self {
        PorterError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for PorterError {
    fn from(err: serde_json::Error) -> Self {
        PorterError::Json(Arc::new(err))
    }
}

impl From<zip::result::ZipError> for PorterError {
    fn from(err: zip::result::ZipError) -> Self {
        PorterError::Archive(Arc::new(err))
    }
}

impl From<object::read::Error> for PorterError {
    fn from(err: object::read::Error) -> Self {
        PorterError::Object(Arc::new(err))
    }
}

impl PorterError {
    /// Wraps `self` with a human-readable context, keeping the kind reachable
    /// through [`PorterError::root`].
    pub fn context(self, context: impl Display) -> Self {
        PorterError::Context {
            context: context.to_string(),
            source: Arc::new(self),
        }
    }

    /// The innermost error, skipping any context layers.
    pub fn root(&self) -> &PorterError {
        match self {
            PorterError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), PorterError::Cancelled)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.root(), PorterError::Aborted(_))
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self.root() {
            PorterError::Cancelled => ErrorCode::OperationCancelled,
            PorterError::Aborted(_) => ErrorCode::OperationAborted,
            PorterError::NetworkDisconnected(_) => ErrorCode::NetworkDisconnected,
            PorterError::Validation(_) | PorterError::OperationInProgress(_) => {
                ErrorCode::InvalidParams
            }
            _ => ErrorCode::Internal,
        }
    }

    /// Renders the message followed by every source in the chain, separated
    /// by `: `. Sent to clients as the `errorStack` of failures.
    pub fn causal_chain(&self) -> String {
        let mut out = self.to_string();
        let mut current: Option<&dyn std::error::Error> = std::error::Error::source(self);
        while let Some(err) = current {
            out.push_str(": ");
            out.push_str(&err.to_string());
            current = err.source();
        }
        out
    }
}

/// Adds context to the error side of a [`Result`].
pub trait ResultExt<T> {
    fn context(self, context: impl Display) -> Result<T>;
    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<PorterError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Display) -> Result<T> {
        self.map_err(|e| Into::<PorterError>::into(e).context(context))
    }

    fn with_context<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| Into::<PorterError>::into(e).context(f()))
    }
}

pub type Result<T> = std::result::Result<T, PorterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_root_kind() {
        let err = PorterError::Cancelled
            .context("while downloading")
            .context("install task");
        assert!(err.is_cancelled());
        assert_eq!(err.code(), ErrorCode::OperationCancelled);
        assert_eq!(err.to_string(), "install task");
    }

    #[test]
    fn causal_chain_lists_every_layer() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = PorterError::from(io).context("reading receipt");
        assert_eq!(
            err.causal_chain(),
            "reading receipt: I/O Error: no such file: no such file"
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::OperationCancelled as i64, 499);
        assert_eq!(ErrorCode::OperationAborted as i64, 410);
        assert_eq!(
            PorterError::Aborted("user said no".into()).code(),
            ErrorCode::OperationAborted
        );
        assert_eq!(
            PorterError::Validation("x".into()).code(),
            ErrorCode::InvalidParams
        );
        assert_eq!(PorterError::Generic("x".into()).code(), ErrorCode::Internal);
    }

    #[test]
    fn result_ext_wraps_foreign_errors() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = res.context("writing lock").unwrap_err();
        assert!(matches!(err.root(), PorterError::Io(_)));
    }
}
