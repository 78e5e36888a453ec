//! Native heap seam: the allocate/free pair packed buffers live in
//!
//! [`NativeHeap`] is the interface the marshaler consumes. [`LinearHeap`] is
//! the provided implementation: an arena of owned, length-tracked byte
//! buffers addressed by 32-bit pointers, the way a WASM linear memory hands
//! out addresses.

use std::collections::BTreeMap;
use std::fmt;

use super::error::{MarshalError, MarshalResult};

/// Allocation alignment, enough for the widest element.
const ALIGN: u32 = 8;

/// First address handed out. Zero stays reserved as the null pointer.
const HEAP_BASE: u32 = ALIGN;

/// End of the 32-bit address space.
const ADDRESS_SPACE: u64 = 1 << 32;

/// Address of a native allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferPtr(u32);

impl BufferPtr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Allocate/free primitives of the native side.
///
/// Implementations must reject access to freed or unknown pointers with
/// [`MarshalError::InvalidPointer`] rather than hand out stale memory.
pub trait NativeHeap {
    /// Allocate `size` zeroed bytes.
    fn allocate(&mut self, size: usize) -> MarshalResult<BufferPtr>;

    /// Release an allocation.
    fn free(&mut self, ptr: BufferPtr) -> MarshalResult<()>;

    /// The full allocation behind `ptr`.
    fn bytes(&self, ptr: BufferPtr) -> MarshalResult<&[u8]>;

    fn bytes_mut(&mut self, ptr: BufferPtr) -> MarshalResult<&mut [u8]>;

    /// Bytes currently allocated.
    fn in_use(&self) -> usize;

    /// Number of live allocations.
    fn live_allocations(&self) -> usize;
}

/// Arena heap over a 32-bit address space.
///
/// Addresses grow monotonically, so a freed pointer stays invalid. Once the
/// untouched top of the address space can no longer fit a request, freed
/// ranges between live allocations are recycled first-fit; from then on a
/// stale pointer is only rejected until its address is handed out again.
#[derive(Debug)]
pub struct LinearHeap {
    allocations: BTreeMap<u32, Vec<u8>>,
    next_addr: u64,
    in_use: usize,
    limit: Option<usize>,
    address_space: u64,
}

impl Default for LinearHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearHeap {
    /// Unbounded heap.
    pub fn new() -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_addr: u64::from(HEAP_BASE),
            in_use: 0,
            limit: None,
            address_space: ADDRESS_SPACE,
        }
    }

    /// Heap refusing allocations once `limit` bytes are live.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Bytes currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_live(&self, ptr: BufferPtr) -> bool {
        self.allocations.contains_key(&ptr.addr())
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// First gap between live allocations that fits `span` bytes.
    fn find_gap(&self, span: u64) -> Option<u64> {
        let mut cursor = u64::from(HEAP_BASE);
        for (&addr, buf) in &self.allocations {
            if u64::from(addr) - cursor >= span {
                return Some(cursor);
            }
            cursor = u64::from(addr) + span_of(buf.len());
        }
        (self.address_space - cursor >= span).then_some(cursor)
    }
}

/// Address range reserved for an allocation of `size` bytes: at least one
/// aligned slot, so every allocation gets a distinct address even at size 0.
fn span_of(size: usize) -> u64 {
    let align = u64::from(ALIGN);
    (size.max(1) as u64 + align - 1) & !(align - 1)
}

impl NativeHeap for LinearHeap {
    fn allocate(&mut self, size: usize) -> MarshalResult<BufferPtr> {
        let failed = MarshalError::AllocationFailed { requested: size };

        if let Some(limit) = self.limit {
            if self.in_use.checked_add(size).map_or(true, |total| total > limit) {
                tracing::debug!(size, in_use = self.in_use, limit, "heap limit reached");
                return Err(failed);
            }
        }

        let span = span_of(size);
        let addr = if self.address_space - self.next_addr >= span {
            let addr = self.next_addr;
            self.next_addr += span;
            addr
        } else {
            let addr = self.find_gap(span).ok_or(failed)?;
            tracing::debug!(addr, span, "address space exhausted, recycling freed range");
            addr
        };
        let addr = u32::try_from(addr).map_err(|_| MarshalError::AllocationFailed {
            requested: size,
        })?;

        self.allocations.insert(addr, vec![0u8; size]);
        self.in_use += size;

        let ptr = BufferPtr::new(addr);
        tracing::trace!(%ptr, size, "allocated");
        Ok(ptr)
    }

    fn free(&mut self, ptr: BufferPtr) -> MarshalResult<()> {
        let buf = self
            .allocations
            .remove(&ptr.addr())
            .ok_or(MarshalError::InvalidPointer(ptr))?;
        self.in_use -= buf.len();
        tracing::trace!(%ptr, size = buf.len(), "freed");
        Ok(())
    }

    fn bytes(&self, ptr: BufferPtr) -> MarshalResult<&[u8]> {
        self.allocations
            .get(&ptr.addr())
            .map(Vec::as_slice)
            .ok_or(MarshalError::InvalidPointer(ptr))
    }

    fn bytes_mut(&mut self, ptr: BufferPtr) -> MarshalResult<&mut [u8]> {
        self.allocations
            .get_mut(&ptr.addr())
            .map(Vec::as_mut_slice)
            .ok_or(MarshalError::InvalidPointer(ptr))
    }

    fn in_use(&self) -> usize {
        self.in_use
    }

    fn live_allocations(&self) -> usize {
        self.allocations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_distinct_and_aligned() {
        let mut heap = LinearHeap::new();
        let a = heap.allocate(3).unwrap();
        let b = heap.allocate(0).unwrap();
        let c = heap.allocate(17).unwrap();

        assert_ne!(a.addr(), 0);
        assert!(a < b && b < c);
        for ptr in [a, b, c] {
            assert_eq!(ptr.addr() % ALIGN, 0);
        }
        assert_eq!(heap.bytes(c).unwrap().len(), 17);
        assert_eq!(heap.in_use(), 20);
        assert_eq!(heap.live_allocations(), 3);
    }

    #[test]
    fn test_free_invalidates_pointer() {
        let mut heap = LinearHeap::new();
        let ptr = heap.allocate(8).unwrap();
        heap.free(ptr).unwrap();

        assert!(!heap.is_live(ptr));
        assert_eq!(heap.free(ptr), Err(MarshalError::InvalidPointer(ptr)));
        assert!(heap.bytes(ptr).is_err());

        // Addresses are not recycled
        let next = heap.allocate(8).unwrap();
        assert_ne!(next, ptr);
    }

    #[test]
    fn test_limit_rejects_allocation() {
        let mut heap = LinearHeap::with_limit(16);
        let ptr = heap.allocate(12).unwrap();
        assert_eq!(
            heap.allocate(8),
            Err(MarshalError::AllocationFailed { requested: 8 })
        );

        heap.free(ptr).unwrap();
        assert!(heap.allocate(16).is_ok());
    }

    #[test]
    fn test_freed_ranges_recycled_when_address_space_runs_out() {
        let mut heap = LinearHeap {
            address_space: 64,
            ..LinearHeap::new()
        };
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        let c = heap.allocate(16).unwrap();
        assert!(heap.allocate(16).is_err());

        // Only the gap left by `b` fits
        heap.free(b).unwrap();
        assert_eq!(heap.allocate(24), Err(MarshalError::AllocationFailed { requested: 24 }));
        assert_eq!(heap.allocate(16).unwrap(), b);

        heap.free(a).unwrap();
        heap.free(b).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.allocate(48).unwrap(), BufferPtr::new(HEAP_BASE));
        assert_eq!(heap.live_allocations(), 1);
    }

    #[test]
    fn test_pointer_display() {
        assert_eq!(BufferPtr::new(0x40).to_string(), "0x00000040");
    }
}
