//! Wrapper handles over native objects

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::class::NativeClass;
use super::error::{HandleError, HandleResult};
use super::native::{NativeLibrary, NativePtr};
use super::registry::RegistryShared;

/// Registry-unique handle identifier.
pub type HandleId = u64;

/// The capability the registry needs from a handle, independent of its
/// concrete class.
pub trait ManagedHandle: Send + Sync {
    fn id(&self) -> HandleId;

    /// Concrete type tag for diagnostics.
    fn type_name(&self) -> &'static str;

    fn is_deleted(&self) -> bool;

    /// Release the native object now.
    fn delete(&self) -> HandleResult<()>;
}

#[derive(Debug)]
struct CellState {
    /// `None` once released
    ptr: Option<NativePtr>,
    delete_scheduled: bool,
}

/// Shared state of one wrapper. Every alias of a handle points here.
pub(crate) struct HandleCell {
    id: HandleId,
    type_name: &'static str,
    state: Mutex<CellState>,
    library: Arc<dyn NativeLibrary>,
    registry: Weak<RegistryShared>,
}

impl HandleCell {
    /// New cell, already marked as scheduled for deletion. The caller
    /// enrolls it.
    pub(crate) fn new(
        id: HandleId,
        type_name: &'static str,
        ptr: NativePtr,
        library: Arc<dyn NativeLibrary>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            id,
            type_name,
            state: Mutex::new(CellState {
                ptr: Some(ptr),
                delete_scheduled: true,
            }),
            library,
            registry,
        }
    }

    pub(crate) fn registry(&self) -> Option<Arc<RegistryShared>> {
        self.registry.upgrade()
    }

    /// Identity of the owning registry, valid even after it is dropped.
    pub(crate) fn registry_ptr(&self) -> *const RegistryShared {
        self.registry.as_ptr()
    }

    /// Native pointer, or a use-after-delete error naming `operation`.
    pub(crate) fn ptr(&self, operation: &'static str) -> HandleResult<NativePtr> {
        self.state.lock().ptr.ok_or(HandleError::UseAfterDelete {
            type_name: self.type_name,
            operation,
        })
    }

    pub(crate) fn peek_ptr(&self) -> Option<NativePtr> {
        self.state.lock().ptr
    }

    pub(crate) fn is_delete_scheduled(&self) -> bool {
        self.state.lock().delete_scheduled
    }

    /// Clear the scheduled flag. Fails on a deleted handle.
    pub(crate) fn unschedule(&self, operation: &'static str) -> HandleResult<()> {
        let mut state = self.state.lock();
        if state.ptr.is_none() {
            return Err(HandleError::UseAfterDelete {
                type_name: self.type_name,
                operation,
            });
        }
        state.delete_scheduled = false;
        Ok(())
    }

    /// Set the scheduled flag. Fails on a deleted or already scheduled
    /// handle.
    pub(crate) fn schedule(&self, operation: &'static str) -> HandleResult<()> {
        let mut state = self.state.lock();
        if state.ptr.is_none() {
            return Err(HandleError::UseAfterDelete {
                type_name: self.type_name,
                operation,
            });
        }
        if state.delete_scheduled {
            return Err(HandleError::AlreadyScheduled {
                type_name: self.type_name,
            });
        }
        state.delete_scheduled = true;
        Ok(())
    }

    /// Clear the scheduled flag of a handle dropped from the queue without
    /// being released.
    pub(crate) fn clear_scheduled(&self) {
        self.state.lock().delete_scheduled = false;
    }
}

impl ManagedHandle for HandleCell {
    fn id(&self) -> HandleId {
        self.id
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn is_deleted(&self) -> bool {
        self.state.lock().ptr.is_none()
    }

    fn delete(&self) -> HandleResult<()> {
        // The queue lock spans take and dequeue, so a drain pass never pops
        // a handle that is already released. The native release runs outside
        // both locks: its side effects may touch this handle again.
        let registry = self.registry();
        let queue = registry.as_ref().map(|registry| registry.lock_queue());
        let ptr = {
            let mut state = self.state.lock();
            let ptr = state.ptr.take().ok_or(HandleError::DoubleDelete {
                type_name: self.type_name,
            })?;
            state.delete_scheduled = false;
            ptr
        };
        if let Some(registry) = &registry {
            registry.dequeue(self.id);
        }
        drop(queue);

        self.library.release(self.type_name, ptr);
        tracing::trace!(id = self.id, %ptr, type_name = self.type_name, "released native object");
        Ok(())
    }
}

impl fmt::Debug for HandleCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleCell")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("ptr", &state.ptr)
            .field("delete_scheduled", &state.delete_scheduled)
            .finish()
    }
}

/// Host-side wrapper around one native object of class `C`.
///
/// `Clone` makes another *alias* of the same wrapper: aliases share the
/// native pointer and the deleted/scheduled flags. Use
/// [`Handle::duplicate`] for an independent handle over a copied native
/// object.
pub struct Handle<C: NativeClass> {
    cell: Arc<HandleCell>,
    _class: PhantomData<fn() -> C>,
}

impl<C: NativeClass> Handle<C> {
    pub(crate) fn from_cell(cell: Arc<HandleCell>) -> Self {
        Self {
            cell,
            _class: PhantomData,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<HandleCell> {
        &self.cell
    }

    pub fn id(&self) -> HandleId {
        self.cell.id
    }

    pub fn type_name(&self) -> &'static str {
        C::NAME
    }

    pub fn is_deleted(&self) -> bool {
        self.cell.is_deleted()
    }

    /// Whether the handle will be released by the next drain.
    pub fn is_delete_scheduled(&self) -> bool {
        self.cell.is_delete_scheduled()
    }

    /// Native pointer for passing to a native operation.
    pub fn native_ptr(&self) -> HandleResult<NativePtr> {
        self.cell.ptr("access native object")
    }

    /// Release the native object immediately and drop the handle from the
    /// deletion queue.
    pub fn delete(&self) -> HandleResult<()> {
        self.cell.delete()
    }

    /// Exempt this handle from automatic deletion. Idempotent. The native
    /// object must then be released with [`Handle::delete`] or it leaks.
    pub fn prevent_auto_delete(&self) -> HandleResult<&Self> {
        match self.cell.registry() {
            Some(registry) => registry.prevent_auto_delete(&self.cell)?,
            None => self.cell.unschedule("prevent auto delete")?,
        }
        Ok(self)
    }

    /// Put an exempted handle back on the deletion queue.
    pub fn delete_later(&self) -> HandleResult<&Self> {
        let registry = self.cell.registry().ok_or(HandleError::RegistryClosed)?;
        registry.delete_later(&self.cell)?;
        Ok(self)
    }

    /// New independent handle over a native copy of this object, enrolled
    /// for automatic deletion regardless of this handle's exemption.
    pub fn duplicate(&self) -> HandleResult<Handle<C>> {
        let ptr = self.cell.ptr("clone")?;
        let registry = self.cell.registry().ok_or(HandleError::RegistryClosed)?;
        let copy = self.cell.library.copy(C::NAME, ptr)?;
        Ok(registry.construct::<C>(copy))
    }

    /// Whether both handles refer to the same live native object.
    pub fn is_alias_of<D: NativeClass>(&self, other: &Handle<D>) -> bool {
        match (self.cell.peek_ptr(), other.cell.peek_ptr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Type-erased view of this handle.
    pub fn as_managed(&self) -> Arc<dyn ManagedHandle> {
        self.cell.clone()
    }
}

impl<C: NativeClass> Clone for Handle<C> {
    fn clone(&self) -> Self {
        Self::from_cell(Arc::clone(&self.cell))
    }
}

impl<C: NativeClass> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("class", &C::NAME)
            .field("cell", &self.cell)
            .finish()
    }
}

impl<C: NativeClass> ManagedHandle for Handle<C> {
    fn id(&self) -> HandleId {
        self.cell.id
    }

    fn type_name(&self) -> &'static str {
        C::NAME
    }

    fn is_deleted(&self) -> bool {
        self.cell.is_deleted()
    }

    fn delete(&self) -> HandleResult<()> {
        self.cell.delete()
    }
}
