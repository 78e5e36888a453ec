//! Bounds-checked views over a packed buffer
//!
//! Layout: a little-endian `u32` element count in a slot of
//! [`ElementKind::header_width`] bytes, followed by `count` little-endian
//! elements of [`ElementKind::width`] bytes each.

use super::error::{MarshalError, MarshalResult};
use super::kind::ElementKind;

/// Read-only view of a packed buffer.
#[derive(Debug, Clone, Copy)]
pub struct PackedBuffer<'a> {
    bytes: &'a [u8],
    kind: ElementKind,
    len: usize,
}

impl<'a> PackedBuffer<'a> {
    /// Validate the header against the allocation size.
    pub fn new(bytes: &'a [u8], kind: ElementKind) -> MarshalResult<Self> {
        let header = read_header(bytes)?;
        if bytes.len() < kind.header_width() {
            return Err(MarshalError::Truncated {
                declared: header,
                available: 0,
            });
        }
        let available = bytes.len().saturating_sub(kind.header_width()) / kind.width();
        if header > available {
            return Err(MarshalError::Truncated {
                declared: header,
                available,
            });
        }
        Ok(Self {
            bytes,
            kind,
            len: header,
        })
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Element count recorded in the header.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Element at `index` as a host number.
    pub fn get(&self, index: usize) -> MarshalResult<f64> {
        let range = slot(self.kind, index, self.len)?;
        Ok(self.kind.load(&self.bytes[range]))
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let kind = self.kind;
        self.bytes[kind.header_width()..]
            .chunks_exact(kind.width())
            .take(self.len)
            .map(move |chunk| kind.load(chunk))
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }
}

/// Writable view used while encoding.
#[derive(Debug)]
pub struct PackedBufferMut<'a> {
    bytes: &'a mut [u8],
    kind: ElementKind,
    len: usize,
}

impl<'a> PackedBufferMut<'a> {
    /// Write the header for `len` elements. Fails when the allocation is too
    /// small or `len` does not fit the header.
    pub fn init(bytes: &'a mut [u8], kind: ElementKind, len: usize) -> MarshalResult<Self> {
        let header = u32::try_from(len).map_err(|_| MarshalError::LengthOverflow(len))?;
        let needed = kind
            .buffer_size(len)
            .ok_or(MarshalError::LengthOverflow(len))?;
        if bytes.len() < needed {
            return Err(MarshalError::Truncated {
                declared: len,
                available: bytes.len().saturating_sub(kind.header_width()) / kind.width(),
            });
        }
        bytes[..4].copy_from_slice(&header.to_le_bytes());
        Ok(Self { bytes, kind, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, index: usize, value: f64) -> MarshalResult<()> {
        let range = slot(self.kind, index, self.len)?;
        self.kind.store(value, &mut self.bytes[range]);
        Ok(())
    }

    /// Raw element slot, for typed writers that bypass host numbers.
    pub(crate) fn slot_mut(&mut self, index: usize) -> MarshalResult<&mut [u8]> {
        let range = slot(self.kind, index, self.len)?;
        Ok(&mut self.bytes[range])
    }
}

/// Element count stored in the header.
pub(crate) fn read_header(bytes: &[u8]) -> MarshalResult<usize> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(MarshalError::Truncated {
            declared: 0,
            available: 0,
        })?;
    Ok(u32::from_le_bytes(raw) as usize)
}

fn slot(kind: ElementKind, index: usize, len: usize) -> MarshalResult<std::ops::Range<usize>> {
    if index >= len {
        return Err(MarshalError::IndexOutOfBounds { index, len });
    }
    let start = kind.header_width() + index * kind.width();
    Ok(start..start + kind.width())
}
