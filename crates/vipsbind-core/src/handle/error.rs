//! Handle lifecycle error types

use thiserror::Error;

/// Errors raised by handle and registry operations.
///
/// All of these are contract violations by the caller; none is retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    /// `delete` on a handle whose native object is already released
    #[error("{type_name} instance already deleted")]
    DoubleDelete { type_name: &'static str },

    /// Any other operation on a released handle
    #[error("cannot {operation}: {type_name} instance already deleted")]
    UseAfterDelete {
        type_name: &'static str,
        operation: &'static str,
    },

    /// `delete_later` on a handle that is already queued
    #[error("{type_name} object already scheduled for deletion")]
    AlreadyScheduled { type_name: &'static str },

    /// The native library could not copy an object
    #[error("native {type_name} operation failed: {message}")]
    Native {
        type_name: &'static str,
        message: String,
    },

    /// A handle passed to a registry other than the one that created it
    #[error("{type_name} handle belongs to another registry")]
    ForeignHandle { type_name: &'static str },

    /// The registry was shut down or dropped
    #[error("handle registry is closed")]
    RegistryClosed,
}

impl HandleError {
    /// Whether this is a double-delete or use-after-delete error.
    pub fn is_deleted_error(&self) -> bool {
        matches!(
            self,
            HandleError::DoubleDelete { .. } | HandleError::UseAfterDelete { .. }
        )
    }

    /// Concrete handle type the error is about, if any.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            HandleError::DoubleDelete { type_name }
            | HandleError::UseAfterDelete { type_name, .. }
            | HandleError::AlreadyScheduled { type_name }
            | HandleError::ForeignHandle { type_name }
            | HandleError::Native { type_name, .. } => Some(type_name),
            HandleError::RegistryClosed => None,
        }
    }
}

/// Result type for handle operations
pub type HandleResult<T> = Result<T, HandleError>;
