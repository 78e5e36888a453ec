//! Handle lifecycle tracking
//!
//! A [`Handle`] wraps one native object. Constructing a handle enrolls it in
//! its [`HandleRegistry`]'s deletion queue; the next drain releases it unless
//! it was exempted with [`Handle::prevent_auto_delete`].
//!
//! ```text
//!   construct ──► [ A  B  C ] ◄── delete_later
//!                   │     ▲
//!   prevent_auto_delete   │ drain pops C, B, A (newest first),
//!   removes one entry     │ looping until empty
//! ```
//!
//! The registry depends only on the [`ManagedHandle`] capability, so one
//! queue holds handles of every class. Native objects come from a
//! [`NativeLibrary`]; [`SimulatedLibrary`] is an in-memory one for testing.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vipsbind_core::handle::{HandleRegistry, Image, SimulatedLibrary};
//!
//! let lib = Arc::new(SimulatedLibrary::new());
//! let registry = HandleRegistry::new(lib.clone());
//!
//! let image = registry.construct::<Image>(lib.create::<Image>());
//! image.delete().unwrap();
//!
//! let err = image.delete().unwrap_err();
//! assert_eq!(err.to_string(), "Image instance already deleted");
//! ```

mod class;
mod error;
mod native;
mod registry;
mod wrapper;

pub use class::{
    Connection, Image, Interpolate, NativeClass, Source, SourceCustom, Target, TargetCustom,
};
pub use error::{HandleError, HandleResult};
pub use native::{NativeLibrary, NativePtr, SimulatedLibrary};
pub use registry::{
    DrainMode, DrainOutcome, FlushTrigger, HandleRegistry, LeakReport, LeakedHandle, PendingFlush,
};
pub use wrapper::{Handle, HandleId, ManagedHandle};
