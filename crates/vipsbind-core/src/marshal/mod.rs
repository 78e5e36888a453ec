//! Vector marshaling between host numeric arrays and packed native buffers
//!
//! A packed buffer is a length header followed by `length` elements of one
//! [`ElementKind`]:
//!
//! ```text
//! ┌──────────────────────┬──────────┬──────────┬─────┐
//! │ u32 len (LE), padded │ elem 0   │ elem 1   │ ... │
//! │ to max(4, width)     │ width    │ width    │     │
//! └──────────────────────┴──────────┴──────────┴─────┘
//! ```
//!
//! The marshaler holds no state. Buffers live in a [`NativeHeap`]; encoding
//! hands ownership of the returned pointer to the call site, decoding frees
//! the buffer.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use vipsbind_core::marshal::{decode, encode, ElementKind, LinearHeap};
//!
//! let mut heap = LinearHeap::new();
//! let ptr = encode(&mut heap, &json!([1, 2, 3]), ElementKind::Int32).unwrap();
//! assert_eq!(decode(&mut heap, ptr, ElementKind::Int32).unwrap(), vec![1.0, 2.0, 3.0]);
//!
//! // The buffer was freed by the first decode
//! assert!(decode(&mut heap, ptr, ElementKind::Int32).is_err());
//! ```

mod buffer;
mod codec;
mod destructors;
mod error;
mod heap;
mod kind;
mod types;

pub use buffer::{PackedBuffer, PackedBufferMut};
pub use codec::{
    decode, decode_value, decode_vec, encode, encode_numbers, encode_slice, flatten,
};
pub use destructors::Destructors;
pub use error::{MarshalError, MarshalResult};
pub use heap::{BufferPtr, LinearHeap, NativeHeap};
pub use kind::{Element, ElementKind};
pub use types::{default_vector_types, VectorType, VectorTypes};
