//! Handle registry and its deletion queue
//!
//! Every handle is enrolled in the deletion queue when constructed. A drain
//! pass pops handles newest-first and deletes each one, looping until the
//! queue is empty: handles enrolled while the pass runs (for example by a
//! native release side effect) are drained by the same pass.
//!
//! The queue sits behind a re-entrant lock that is held for the whole pass,
//! so other threads wait for the pass while the draining thread may re-enter
//! the registry from release side effects.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};

use super::class::NativeClass;
use super::error::{HandleError, HandleResult};
use super::native::{NativeLibrary, NativePtr};
use super::wrapper::{Handle, HandleCell, HandleId, ManagedHandle};

/// When queued handles are released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    /// A drain request releases the queue right away.
    #[default]
    Immediate,
    /// A drain request schedules a flush through the registered trigger;
    /// the queue is released when the caller runs it.
    Deferred,
}

/// Result of a drain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was drained; this many handles were released.
    Released(usize),
    /// A flush was scheduled (or was already pending).
    Deferred,
}

/// Callback receiving the token for a scheduled flush.
pub type FlushTrigger = Arc<dyn Fn(PendingFlush) + Send + Sync>;

/// Token for one scheduled drain pass. Run it at the point the host
/// chooses, e.g. at the end of an event loop turn.
pub struct PendingFlush {
    registry: Weak<RegistryShared>,
}

impl PendingFlush {
    /// Drain the queue. Returns the number of handles released.
    pub fn run(self) -> HandleResult<usize> {
        self.registry
            .upgrade()
            .ok_or(HandleError::RegistryClosed)?
            .flush()
    }
}

impl fmt::Debug for PendingFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlush")
            .field("registry_alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

/// A handle still queued at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedHandle {
    pub id: HandleId,
    pub type_name: &'static str,
}

/// Handles whose native objects were never released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub leaked: Vec<LeakedHandle>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }

    pub fn len(&self) -> usize {
        self.leaked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaked.is_empty()
    }

    /// Leak counts per type name.
    pub fn by_type(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for leak in &self.leaked {
            *counts.entry(leak.type_name).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Default)]
struct FlushState {
    trigger: Option<FlushTrigger>,
    pending: bool,
}

pub(crate) type Queue = VecDeque<Arc<HandleCell>>;

pub(crate) struct RegistryShared {
    queue: ReentrantMutex<RefCell<Queue>>,
    library: Arc<dyn NativeLibrary>,
    next_id: AtomicU64,
    mode: Mutex<DrainMode>,
    flush: Mutex<FlushState>,
    closed: AtomicBool,
}

impl RegistryShared {
    pub(crate) fn construct<C: NativeClass>(self: &Arc<Self>, ptr: NativePtr) -> Handle<C> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(HandleCell::new(
            id,
            C::NAME,
            ptr,
            Arc::clone(&self.library),
            Arc::downgrade(self),
        ));
        self.enroll(&cell);
        tracing::trace!(id, %ptr, type_name = C::NAME, "constructed handle");
        Handle::from_cell(cell)
    }

    /// Append to the queue; in deferred mode the first entry requests a
    /// flush. A closed registry still queues the handle, so a later
    /// shutdown or drop reports it.
    fn enroll(self: &Arc<Self>, cell: &Arc<HandleCell>) {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(
                id = cell.id(),
                type_name = cell.type_name(),
                "handle enrolled after shutdown, it will not be drained"
            );
        }
        let became_non_empty = {
            let guard = self.queue.lock();
            let mut queue = guard.borrow_mut();
            queue.push_back(Arc::clone(cell));
            queue.len() == 1
        };
        if became_non_empty && self.mode() == DrainMode::Deferred {
            self.request_flush();
        }
    }

    /// Lock the queue without borrowing it. Held by `delete` so that no
    /// drain pass pops a handle while it is being released elsewhere.
    pub(crate) fn lock_queue(&self) -> ReentrantMutexGuard<'_, RefCell<Queue>> {
        self.queue.lock()
    }

    /// Remove a handle from the queue. Returns whether it was queued.
    pub(crate) fn dequeue(&self, id: HandleId) -> bool {
        let guard = self.queue.lock();
        let mut queue = guard.borrow_mut();
        match queue.iter().position(|h| h.id() == id) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn prevent_auto_delete(&self, cell: &HandleCell) -> HandleResult<()> {
        let _guard = self.queue.lock();
        cell.unschedule("prevent auto delete")?;
        if self.dequeue(cell.id()) {
            tracing::trace!(id = cell.id(), type_name = cell.type_name(), "exempted from auto delete");
        }
        Ok(())
    }

    pub(crate) fn delete_later(self: &Arc<Self>, cell: &Arc<HandleCell>) -> HandleResult<()> {
        cell.schedule("delete later")?;
        self.enroll(cell);
        Ok(())
    }

    fn mode(&self) -> DrainMode {
        *self.mode.lock()
    }

    fn queue_len(&self) -> usize {
        self.queue.lock().borrow().len()
    }

    fn request_flush(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let trigger = {
            let mut flush = self.flush.lock();
            if flush.pending {
                return;
            }
            flush.pending = true;
            flush.trigger.clone()
        };
        tracing::debug!("deferred flush requested");
        if let Some(trigger) = trigger {
            trigger(PendingFlush {
                registry: Arc::downgrade(self),
            });
        }
    }

    /// One full drain pass.
    fn flush(&self) -> HandleResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HandleError::RegistryClosed);
        }

        let guard = self.queue.lock();
        let mut released = 0;
        loop {
            let next = guard.borrow_mut().pop_back();
            let handle = match next {
                Some(handle) => handle,
                None => break,
            };
            match handle.delete() {
                Ok(()) => released += 1,
                // A deleted handle is dequeued under this lock, so it can
                // only be here if a release path skipped the registry
                Err(err) => tracing::warn!(
                    id = handle.id(),
                    type_name = handle.type_name(),
                    "queued handle already released: {}",
                    err
                ),
            }
        }
        // Cleared before the queue lock is released, so a request racing
        // the end of the pass schedules a new flush.
        self.flush.lock().pending = false;
        drop(guard);

        tracing::debug!(released, "drained deletion queue");
        Ok(released)
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedHandle>> {
        self.queue
            .lock()
            .borrow()
            .iter()
            .map(|cell| Arc::clone(cell) as Arc<dyn ManagedHandle>)
            .collect()
    }

    fn owns(self: &Arc<Self>, cell: &HandleCell) -> bool {
        cell.registry_ptr() == Arc::as_ptr(self)
    }

    /// Fails unless `handle` was constructed by this registry.
    fn check_owner<C: NativeClass>(self: &Arc<Self>, handle: &Handle<C>) -> HandleResult<()> {
        if self.owns(handle.cell()) {
            Ok(())
        } else {
            Err(HandleError::ForeignHandle { type_name: C::NAME })
        }
    }
}

impl Drop for RegistryShared {
    fn drop(&mut self) {
        let queue = self.queue.get_mut().get_mut();
        if queue.is_empty() {
            return;
        }
        for cell in queue.iter() {
            tracing::warn!(id = cell.id(), type_name = cell.type_name(), "native object leaked at drop");
        }
        tracing::warn!(
            pending = queue.len(),
            "handle registry dropped with queued handles, native objects leaked"
        );
    }
}

/// Registry of live handles pending deletion.
///
/// Cloning the registry yields another reference to the same queue. Each
/// registry is independent; there is no process-global instance.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use vipsbind_core::handle::{DrainMode, HandleRegistry, Image, SimulatedLibrary};
///
/// let lib = Arc::new(SimulatedLibrary::new());
/// let registry = HandleRegistry::new(lib.clone());
///
/// let a = registry.construct::<Image>(lib.create::<Image>());
/// let b = registry.construct::<Image>(lib.create::<Image>());
/// a.prevent_auto_delete().unwrap();
/// assert_eq!(registry.queue_len(), 1);
///
/// registry.drain_queue(DrainMode::Immediate).unwrap();
/// assert!(b.is_deleted());
/// assert!(!a.is_deleted());
/// a.delete().unwrap();
/// ```
#[derive(Clone)]
pub struct HandleRegistry {
    shared: Arc<RegistryShared>,
}

impl HandleRegistry {
    /// Registry in immediate mode.
    pub fn new(library: Arc<dyn NativeLibrary>) -> Self {
        Self::with_mode(library, DrainMode::default())
    }

    pub fn with_mode(library: Arc<dyn NativeLibrary>, mode: DrainMode) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                queue: ReentrantMutex::new(RefCell::new(VecDeque::new())),
                library,
                next_id: AtomicU64::new(1),
                mode: Mutex::new(mode),
                flush: Mutex::new(FlushState::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn library(&self) -> &Arc<dyn NativeLibrary> {
        &self.shared.library
    }

    pub fn drain_mode(&self) -> DrainMode {
        self.shared.mode()
    }

    pub fn set_drain_mode(&self, mode: DrainMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Register the function that receives [`PendingFlush`] tokens in
    /// deferred mode. Replaces any previous trigger.
    pub fn set_flush_trigger<F>(&self, trigger: F)
    where
        F: Fn(PendingFlush) + Send + Sync + 'static,
    {
        self.shared.flush.lock().trigger = Some(Arc::new(trigger));
    }

    pub fn clear_flush_trigger(&self) {
        self.shared.flush.lock().trigger = None;
    }

    /// Wrap a freshly created native object and enroll it for automatic
    /// deletion.
    pub fn construct<C: NativeClass>(&self, ptr: NativePtr) -> Handle<C> {
        self.shared.construct(ptr)
    }

    /// Release a handle now. See [`Handle::delete`].
    ///
    /// The handle-taking methods fail with [`HandleError::ForeignHandle`]
    /// when given a handle constructed by another registry.
    pub fn delete<C: NativeClass>(&self, handle: &Handle<C>) -> HandleResult<()> {
        self.shared.check_owner(handle)?;
        handle.delete()
    }

    /// See [`Handle::prevent_auto_delete`].
    pub fn prevent_auto_delete<'h, C: NativeClass>(
        &self,
        handle: &'h Handle<C>,
    ) -> HandleResult<&'h Handle<C>> {
        self.shared.check_owner(handle)?;
        handle.prevent_auto_delete()
    }

    /// See [`Handle::delete_later`].
    pub fn delete_later<'h, C: NativeClass>(
        &self,
        handle: &'h Handle<C>,
    ) -> HandleResult<&'h Handle<C>> {
        self.shared.check_owner(handle)?;
        handle.delete_later()
    }

    /// See [`Handle::duplicate`].
    pub fn clone_handle<C: NativeClass>(&self, handle: &Handle<C>) -> HandleResult<Handle<C>> {
        self.shared.check_owner(handle)?;
        handle.duplicate()
    }

    /// Drain the queue now, or schedule a flush.
    pub fn drain_queue(&self, mode: DrainMode) -> HandleResult<DrainOutcome> {
        if self.is_closed() {
            return Err(HandleError::RegistryClosed);
        }
        match mode {
            DrainMode::Immediate => self.shared.flush().map(DrainOutcome::Released),
            DrainMode::Deferred => {
                self.shared.request_flush();
                Ok(DrainOutcome::Deferred)
            }
        }
    }

    /// Drain using the configured mode.
    pub fn drain(&self) -> HandleResult<DrainOutcome> {
        self.drain_queue(self.drain_mode())
    }

    /// Run a pending (or unscheduled) flush now.
    pub fn flush_pending(&self) -> HandleResult<usize> {
        self.shared.flush()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.shared.flush.lock().pending
    }

    /// Number of handles awaiting automatic deletion.
    pub fn queue_len(&self) -> usize {
        self.shared.queue_len()
    }

    pub fn is_queued<C: NativeClass>(&self, handle: &Handle<C>) -> bool {
        let id = handle.id();
        self.shared
            .queue
            .lock()
            .borrow()
            .iter()
            .any(|h| h.id() == id)
    }

    /// Queued handles in enrollment order.
    pub fn pending(&self) -> Vec<Arc<dyn ManagedHandle>> {
        self.shared.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the registry and report every handle still queued. Reported
    /// handles are removed from the queue without being released and are no
    /// longer scheduled. Handles enrolled after shutdown are kept queued and
    /// reported by the next shutdown, or logged when the registry drops.
    pub fn shutdown(&self) -> LeakReport {
        let guard = self.shared.queue.lock();
        self.shared.closed.store(true, Ordering::Release);
        let leaked: Vec<LeakedHandle> = guard
            .borrow_mut()
            .drain(..)
            .map(|cell| {
                cell.clear_scheduled();
                LeakedHandle {
                    id: cell.id(),
                    type_name: cell.type_name(),
                }
            })
            .collect();
        drop(guard);

        for leak in &leaked {
            tracing::warn!(id = leak.id, type_name = leak.type_name, "native object leaked at shutdown");
        }
        tracing::debug!(leaked = leaked.len(), "handle registry shut down");
        LeakReport { leaked }
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("queue_len", &self.queue_len())
            .field("drain_mode", &self.drain_mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}
