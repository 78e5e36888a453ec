//! Bridge service: one registry, one native heap and the vector type table,
//! with explicit init and shutdown.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use vipsbind_core::handle::{
    DrainOutcome, Handle, HandleRegistry, LeakReport, NativeClass, NativeLibrary, NativePtr,
    PendingFlush,
};
use vipsbind_core::marshal::{BufferPtr, Destructors, LinearHeap, NativeHeap, VectorTypes};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::tracing::prefix;

/// Native heap owned by a bridge.
pub type BoxedHeap = Box<dyn NativeHeap + Send>;

/// What was still alive when a bridge shut down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Handles still queued for automatic deletion
    pub handles: LeakReport,
    /// Heap buffers never freed
    pub leaked_buffers: usize,
    pub leaked_bytes: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.handles.is_clean() && self.leaked_buffers == 0
    }
}

/// Scoped bridge between a native library and the host.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use vipsbind::{Bridge, BridgeConfig};
/// use vipsbind_core::handle::{Image, SimulatedLibrary};
///
/// let lib = Arc::new(SimulatedLibrary::new());
/// let bridge = Bridge::init(BridgeConfig::default(), lib.clone()).unwrap();
///
/// let image = bridge.construct::<Image>(lib.create::<Image>());
/// let ptr = bridge.encode("VectorDouble", &json!([1.5, 2.5])).unwrap();
/// assert_eq!(bridge.decode("VectorDouble", ptr).unwrap(), json!([1.5, 2.5]));
///
/// bridge.drain().unwrap();
/// assert!(image.is_deleted());
/// assert!(bridge.shutdown().is_clean());
/// ```
pub struct Bridge {
    config: BridgeConfig,
    registry: HandleRegistry,
    heap: Mutex<BoxedHeap>,
    types: RwLock<VectorTypes>,
}

impl Bridge {
    /// Build a bridge from `config` over `library`, with a [`LinearHeap`]
    /// capped at `config.heap_limit`.
    pub fn init(config: BridgeConfig, library: Arc<dyn NativeLibrary>) -> Result<Self> {
        let heap = match config.heap_limit {
            Some(limit) => LinearHeap::with_limit(limit),
            None => LinearHeap::new(),
        };
        Self::init_with_heap(config, library, Box::new(heap))
    }

    /// Build a bridge over the native library's own allocator.
    /// `config.heap_limit` is left to `heap`.
    pub fn init_with_heap(
        config: BridgeConfig,
        library: Arc<dyn NativeLibrary>,
        heap: BoxedHeap,
    ) -> Result<Self> {
        config.validate()?;

        let registry = HandleRegistry::with_mode(library, config.drain_mode);
        let mut types = VectorTypes::new();
        for ty in &config.vector_types {
            types.register(ty.clone())?;
        }

        tracing::info!(
            "{} bridge ready: drain_mode={:?} heap_limit={:?} vector_types={}",
            prefix::OPEN,
            config.drain_mode,
            config.heap_limit,
            types.len()
        );

        Ok(Self {
            config,
            registry,
            heap: Mutex::new(heap),
            types: RwLock::new(types),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Wrap a native object returned by a native operation.
    pub fn construct<C: NativeClass>(&self, ptr: NativePtr) -> Handle<C> {
        self.registry.construct(ptr)
    }

    pub fn drain(&self) -> Result<DrainOutcome> {
        let outcome = self.registry.drain()?;
        tracing::debug!("{} drain: {:?}", prefix::QUEUE, outcome);
        Ok(outcome)
    }

    pub fn flush_pending(&self) -> Result<usize> {
        let released = self.registry.flush_pending()?;
        tracing::debug!("{} flushed {} handle(s)", prefix::QUEUE, released);
        Ok(released)
    }

    pub fn set_flush_trigger<F>(&self, trigger: F)
    where
        F: Fn(PendingFlush) + Send + Sync + 'static,
    {
        self.registry.set_flush_trigger(trigger);
    }

    /// Register a vector type from a native element descriptor.
    pub fn register_vector_type(
        &self,
        name: &str,
        size: usize,
        is_float: bool,
        is_signed: bool,
    ) -> Result<()> {
        self.types
            .write()
            .register_descriptor(name, size, is_float, is_signed)?;
        Ok(())
    }

    /// Registered vector type names, sorted.
    pub fn vector_types(&self) -> Vec<String> {
        self.types
            .read()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Encode `value` as the vector type `vector`. The caller owns the
    /// returned buffer.
    pub fn encode(&self, vector: &str, value: &Value) -> Result<BufferPtr> {
        let types = self.types.read();
        let ty = types.get(vector)?;
        let mut heap = self.heap.lock();
        Ok(ty.to_wire(&mut **heap, None, value)?)
    }

    /// Encode an argument buffer released by `destructors` after the call.
    pub fn encode_scoped(
        &self,
        vector: &str,
        value: &Value,
        destructors: &mut Destructors,
    ) -> Result<BufferPtr> {
        let types = self.types.read();
        let ty = types.get(vector)?;
        let mut heap = self.heap.lock();
        Ok(ty.to_wire(&mut **heap, Some(destructors), value)?)
    }

    /// Decode a buffer of vector type `vector` and free it.
    pub fn decode(&self, vector: &str, ptr: BufferPtr) -> Result<Value> {
        let types = self.types.read();
        let ty = types.get(vector)?;
        let mut heap = self.heap.lock();
        Ok(ty.from_wire(&mut **heap, ptr)?)
    }

    /// Free the argument buffers of a finished call.
    pub fn run_destructors(&self, destructors: Destructors) -> Result<()> {
        let mut heap = self.heap.lock();
        Ok(destructors.run(&mut **heap)?)
    }

    pub fn free(&self, ptr: BufferPtr) -> Result<()> {
        Ok(self.heap.lock().free(ptr)?)
    }

    /// Run `f` with the native heap, as native code reading or writing a
    /// buffer would.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut (dyn NativeHeap + Send)) -> R) -> R {
        f(&mut **self.heap.lock())
    }

    /// Bytes currently allocated on the native heap.
    pub fn heap_in_use(&self) -> usize {
        self.heap.lock().in_use()
    }

    /// Tear the bridge down and report everything left alive.
    pub fn shutdown(self) -> ShutdownReport {
        let handles = self.registry.shutdown();
        let heap = self.heap.into_inner();
        let report = ShutdownReport {
            handles,
            leaked_buffers: heap.live_allocations(),
            leaked_bytes: heap.in_use(),
        };

        for (type_name, count) in report.handles.by_type() {
            tracing::warn!("{} {} {} handle(s) still queued", prefix::QUEUE, count, type_name);
        }
        if report.is_clean() {
            tracing::info!("{} bridge shut down cleanly", prefix::CLOSE);
        } else {
            tracing::warn!(
                "{} bridge shut down with leaks: {} handle(s), {} buffer(s) ({} bytes)",
                prefix::CLOSE,
                report.handles.len(),
                report.leaked_buffers,
                report.leaked_bytes
            );
        }
        report
    }
}
