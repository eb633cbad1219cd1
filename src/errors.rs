//! Typed error surface for the external-facing APIs.
//!
//! Internal plumbing uses `anyhow`; these kinds exist so the HTTP layer can
//! translate failures into stable status codes (400 for client validation,
//! 403 for unsafe paths, 404 for missing jobs and files, 500 otherwise).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("could not acquire lock after {0}s")]
    LockTimeout(u64),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job not cancellable: {0}")]
    JobNotCancellable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}
