//! vipsbind core
//!
//! Lifetime bridge between a manually managed native image library and a
//! garbage-collected host: a registry that tracks wrapper handles and
//! releases their native objects, and a codec for numeric vectors crossing
//! the boundary as packed buffers.
//!
//! Both halves are plain objects with no process-global state. The native
//! side is consumed through two traits, [`handle::NativeLibrary`] and
//! [`marshal::NativeHeap`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use vipsbind_core::handle::{DrainMode, HandleRegistry, Image, SimulatedLibrary};
//! use vipsbind_core::marshal::{LinearHeap, VectorTypes};
//!
//! let lib = Arc::new(SimulatedLibrary::new());
//! let registry = HandleRegistry::new(lib.clone());
//! let image = registry.construct::<Image>(lib.create::<Image>());
//!
//! let mut heap = LinearHeap::new();
//! let types = VectorTypes::with_defaults();
//! let doubles = types.get("VectorDouble").unwrap();
//! let ptr = doubles.to_wire(&mut heap, None, &json!([[1, 0], [0, 1]])).unwrap();
//! assert_eq!(doubles.from_wire(&mut heap, ptr).unwrap(), json!([1.0, 0.0, 0.0, 1.0]));
//!
//! registry.drain_queue(DrainMode::Immediate).unwrap();
//! assert!(image.is_deleted());
//! ```

pub mod handle;
pub mod marshal;

// Re-export main types at crate root
pub use handle::{
    DrainMode, DrainOutcome, Handle, HandleError, HandleRegistry, LeakReport, ManagedHandle,
    NativeClass, NativeLibrary, NativePtr,
};
pub use marshal::{
    BufferPtr, Destructors, ElementKind, LinearHeap, MarshalError, NativeHeap, VectorType,
    VectorTypes,
};
