//! Marshaling error types

use thiserror::Error;

use super::heap::BufferPtr;

/// Errors raised while moving numeric vectors across the native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// Host value is not a number or a (one level nested) sequence of numbers
    #[error("cannot pass {found} to vector type {vector}")]
    NotNumeric { vector: String, found: &'static str },

    /// Float descriptor with a width other than 4 or 8 bytes
    #[error("unknown float type: {name} ({size} bytes)")]
    UnknownFloatType { name: String, size: usize },

    /// Integer descriptor with a width other than 1, 2 or 4 bytes
    #[error("unknown integer type: {name} ({size} bytes)")]
    UnknownIntegerType { name: String, size: usize },

    /// Element kind name that does not parse
    #[error("unknown element kind: {0}")]
    UnknownKind(String),

    /// Vector type name not present in the type table
    #[error("vector type {0} is not registered")]
    UnknownVectorType(String),

    /// Vector type name registered twice
    #[error("vector type {0} is already registered")]
    DuplicateVectorType(String),

    /// Native heap refused the allocation
    #[error("native allocation of {requested} bytes failed")]
    AllocationFailed { requested: usize },

    /// Sequence longer than the length header can describe
    #[error("sequence of {0} elements does not fit a packed buffer")]
    LengthOverflow(usize),

    /// Pointer is not a live allocation (never allocated, or already freed)
    #[error("buffer {0} is not a live allocation")]
    InvalidPointer(BufferPtr),

    /// Header declares more elements than the allocation can hold
    #[error("packed buffer declares {declared} elements but holds only {available}")]
    Truncated { declared: usize, available: usize },

    /// Element index outside the recorded length
    #[error("element index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl MarshalError {
    /// Whether this error is a type mismatch (bad input or unsupported kind),
    /// as opposed to a resource or memory error.
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            MarshalError::NotNumeric { .. }
                | MarshalError::UnknownFloatType { .. }
                | MarshalError::UnknownIntegerType { .. }
                | MarshalError::UnknownKind(_)
                | MarshalError::UnknownVectorType(_)
        )
    }
}

/// Result type for marshaling operations
pub type MarshalResult<T> = Result<T, MarshalError>;
