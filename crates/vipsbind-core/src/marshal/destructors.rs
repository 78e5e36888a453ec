//! Call-scope cleanup of argument buffers

use super::error::MarshalResult;
use super::heap::{BufferPtr, NativeHeap};

/// Buffers to free once a native call returns.
///
/// Each argument encoded for a call is pushed here. After the call, buffers
/// the callee took ownership of are removed with [`Destructors::disown`] and
/// the rest are freed by [`Destructors::run`].
#[derive(Debug, Default)]
pub struct Destructors {
    pending: Vec<BufferPtr>,
}

impl Destructors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ptr: BufferPtr) {
        self.pending.push(ptr);
    }

    /// Forget `ptr` because the callee now owns it. Returns whether it was
    /// pending.
    pub fn disown(&mut self, ptr: BufferPtr) -> bool {
        match self.pending.iter().position(|&p| p == ptr) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Free every pending buffer. All buffers are attempted; the first
    /// failure is returned.
    pub fn run<H>(self, heap: &mut H) -> MarshalResult<()>
    where
        H: NativeHeap + ?Sized,
    {
        let mut first_err = None;
        for ptr in self.pending {
            if let Err(err) = heap.free(ptr) {
                tracing::warn!(%ptr, "failed to free argument buffer: {}", err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::error::MarshalError;
    use crate::marshal::heap::LinearHeap;

    #[test]
    fn test_run_frees_everything_not_disowned() {
        let mut heap = LinearHeap::new();
        let mut destructors = Destructors::new();
        let a = heap.allocate(8).unwrap();
        let b = heap.allocate(8).unwrap();
        destructors.push(a);
        destructors.push(b);

        assert!(destructors.disown(b));
        assert!(!destructors.disown(b));
        assert_eq!(destructors.len(), 1);

        destructors.run(&mut heap).unwrap();
        assert!(!heap.is_live(a));
        assert!(heap.is_live(b));
    }

    #[test]
    fn test_run_reports_first_failure_but_keeps_going() {
        let mut heap = LinearHeap::new();
        let gone = heap.allocate(4).unwrap();
        heap.free(gone).unwrap();
        let live = heap.allocate(4).unwrap();

        let mut destructors = Destructors::new();
        destructors.push(gone);
        destructors.push(live);

        assert_eq!(
            destructors.run(&mut heap),
            Err(MarshalError::InvalidPointer(gone))
        );
        assert_eq!(heap.live_allocations(), 0);
    }
}
