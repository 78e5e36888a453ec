//! Native object seam: the copy/release pair handles are built on
//!
//! [`NativeLibrary`] is what the registry consumes from the native side.
//! [`SimulatedLibrary`] is an in-memory object table for testing and
//! development; it records releases of unknown objects instead of crashing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::class::NativeClass;
use super::error::{HandleError, HandleResult};

/// Opaque identifier of a native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(u64);

impl NativePtr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Object lifecycle primitives of the native library.
///
/// `release` may run arbitrary native side effects, including calls back
/// into the registry that owns the handle being released.
pub trait NativeLibrary: Send + Sync {
    /// Create a new native object as a copy of `ptr`.
    fn copy(&self, type_name: &'static str, ptr: NativePtr) -> HandleResult<NativePtr>;

    /// Free the native object behind `ptr`. Called at most once per object
    /// by the registry.
    fn release(&self, type_name: &'static str, ptr: NativePtr);
}

/// In-memory native library.
#[derive(Debug)]
pub struct SimulatedLibrary {
    objects: Mutex<HashMap<NativePtr, &'static str>>,
    next_addr: AtomicU64,
    releases: AtomicUsize,
    invalid_releases: AtomicUsize,
}

impl Default for SimulatedLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLibrary {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            next_addr: AtomicU64::new(0x1000),
            releases: AtomicUsize::new(0),
            invalid_releases: AtomicUsize::new(0),
        }
    }

    /// Create a native object of class `C`.
    pub fn create<C: NativeClass>(&self) -> NativePtr {
        self.create_named(C::NAME)
    }

    /// Create a native object with an explicit type name.
    pub fn create_named(&self, type_name: &'static str) -> NativePtr {
        let ptr = NativePtr::new(self.next_addr.fetch_add(0x10, Ordering::Relaxed));
        self.objects.lock().insert(ptr, type_name);
        ptr
    }

    pub fn is_live(&self, ptr: NativePtr) -> bool {
        self.objects.lock().contains_key(&ptr)
    }

    /// Number of objects not yet released.
    pub fn live_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Number of successful releases.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Acquire)
    }

    /// Releases of objects that were not live (double frees). Must stay zero.
    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases.load(Ordering::Acquire)
    }
}

impl NativeLibrary for SimulatedLibrary {
    fn copy(&self, type_name: &'static str, ptr: NativePtr) -> HandleResult<NativePtr> {
        if !self.is_live(ptr) {
            return Err(HandleError::Native {
                type_name,
                message: format!("no live object at {}", ptr),
            });
        }
        Ok(self.create_named(type_name))
    }

    fn release(&self, type_name: &'static str, ptr: NativePtr) {
        if self.objects.lock().remove(&ptr).is_some() {
            self.releases.fetch_add(1, Ordering::AcqRel);
        } else {
            self.invalid_releases.fetch_add(1, Ordering::AcqRel);
            tracing::error!(%ptr, type_name, "release of an object that is not live");
        }
    }
}
