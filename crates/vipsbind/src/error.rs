//! Common error types for vipsbind.

use thiserror::Error;
use vipsbind_core::handle::HandleError;
use vipsbind_core::marshal::MarshalError;

/// Common error type for bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Handle lifecycle error (double delete, use after delete, ...)
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// Vector marshaling error
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error reports an operation on an already deleted handle.
    pub fn is_deleted_error(&self) -> bool {
        matches!(self, Error::Handle(err) if err.is_deleted_error())
    }
}

/// Result type alias using vipsbind Error.
pub type Result<T> = std::result::Result<T, Error>;
