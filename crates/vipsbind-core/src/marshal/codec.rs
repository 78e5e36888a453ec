//! Encode host sequences into packed buffers and decode them back
//!
//! Host values are `serde_json::Value`s. A number is a one-element sequence,
//! an array of numbers is a sequence, and an array of arrays of numbers (rows
//! of a matrix) is flattened in row order. Anything else is a type error,
//! detected before any allocation.

use serde_json::{Number, Value};

use super::buffer::{PackedBuffer, PackedBufferMut};
use super::error::{MarshalError, MarshalResult};
use super::heap::{BufferPtr, NativeHeap};
use super::kind::{Element, ElementKind};

/// Flatten a host value into one flat list of numbers.
///
/// `vector` names the target type in error messages.
pub fn flatten(value: &Value, vector: &str) -> MarshalResult<Vec<f64>> {
    let not_numeric = |found: &Value| MarshalError::NotNumeric {
        vector: vector.to_string(),
        found: describe(found),
    };

    match value {
        Value::Number(n) => Ok(vec![number(n)]),
        Value::Array(items) => {
            let mut flat = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(n) => flat.push(number(n)),
                    Value::Array(row) => {
                        for cell in row {
                            match cell {
                                Value::Number(n) => flat.push(number(n)),
                                other => return Err(not_numeric(other)),
                            }
                        }
                    }
                    other => return Err(not_numeric(other)),
                }
            }
            Ok(flat)
        }
        other => Err(not_numeric(other)),
    }
}

/// Encode a host value as a packed buffer of `kind`.
///
/// The caller owns the returned pointer and frees it after the native call,
/// unless the callee takes ownership.
pub fn encode<H>(heap: &mut H, value: &Value, kind: ElementKind) -> MarshalResult<BufferPtr>
where
    H: NativeHeap + ?Sized,
{
    let flat = flatten(value, kind.name())?;
    encode_numbers(heap, &flat, kind)
}

/// Encode already-flat host numbers.
pub fn encode_numbers<H>(heap: &mut H, values: &[f64], kind: ElementKind) -> MarshalResult<BufferPtr>
where
    H: NativeHeap + ?Sized,
{
    write_packed(heap, kind, values.len(), |out| {
        for (i, &v) in values.iter().enumerate() {
            out.set(i, v)?;
        }
        Ok(())
    })
}

/// Encode a slice of Rust elements without going through host numbers.
pub fn encode_slice<T, H>(heap: &mut H, values: &[T]) -> MarshalResult<BufferPtr>
where
    T: Element,
    H: NativeHeap + ?Sized,
{
    write_packed(heap, T::KIND, values.len(), |out| {
        for (i, &v) in values.iter().enumerate() {
            v.write_le(out.slot_mut(i)?);
        }
        Ok(())
    })
}

/// Decode a packed buffer into host numbers and free it.
///
/// The pointer is invalid afterwards; decoding it again fails with
/// [`MarshalError::InvalidPointer`]. On error the buffer is left untouched.
pub fn decode<H>(heap: &mut H, ptr: BufferPtr, kind: ElementKind) -> MarshalResult<Vec<f64>>
where
    H: NativeHeap + ?Sized,
{
    let values = PackedBuffer::new(heap.bytes(ptr)?, kind)?.to_vec();
    heap.free(ptr)?;
    Ok(values)
}

/// Decode into a host array value and free the buffer.
///
/// Integer kinds produce integer JSON numbers. Non-finite floats have no
/// JSON representation and decode to `null`.
pub fn decode_value<H>(heap: &mut H, ptr: BufferPtr, kind: ElementKind) -> MarshalResult<Value>
where
    H: NativeHeap + ?Sized,
{
    let values = decode(heap, ptr, kind)?;
    Ok(Value::Array(
        values.into_iter().map(|v| to_value(v, kind)).collect(),
    ))
}

/// Decode into Rust elements and free the buffer.
pub fn decode_vec<T, H>(heap: &mut H, ptr: BufferPtr) -> MarshalResult<Vec<T>>
where
    T: Element,
    H: NativeHeap + ?Sized,
{
    let kind = T::KIND;
    let values = {
        let bytes = heap.bytes(ptr)?;
        let len = PackedBuffer::new(bytes, kind)?.len();
        let start = kind.header_width();
        bytes[start..start + len * kind.width()]
            .chunks_exact(kind.width())
            .map(T::read_le)
            .collect()
    };
    heap.free(ptr)?;
    Ok(values)
}

/// Allocate and fill a packed buffer. The allocation is released again if
/// filling fails, so no partial buffer escapes.
fn write_packed<H, F>(heap: &mut H, kind: ElementKind, len: usize, fill: F) -> MarshalResult<BufferPtr>
where
    H: NativeHeap + ?Sized,
    F: FnOnce(&mut PackedBufferMut<'_>) -> MarshalResult<()>,
{
    if u32::try_from(len).is_err() {
        return Err(MarshalError::LengthOverflow(len));
    }
    let size = kind
        .buffer_size(len)
        .ok_or(MarshalError::LengthOverflow(len))?;
    let ptr = heap.allocate(size)?;

    let filled = heap
        .bytes_mut(ptr)
        .and_then(|bytes| PackedBufferMut::init(bytes, kind, len))
        .and_then(|mut out| fill(&mut out));

    if let Err(err) = filled {
        if let Err(free_err) = heap.free(ptr) {
            tracing::warn!(%ptr, "releasing partially written buffer failed: {}", free_err);
        }
        return Err(err);
    }
    tracing::trace!(%ptr, %kind, len, "encoded packed buffer");
    Ok(ptr)
}

fn number(n: &Number) -> f64 {
    n.as_f64().unwrap_or(f64::NAN)
}

fn to_value(v: f64, kind: ElementKind) -> Value {
    if kind.is_float() {
        Number::from_f64(v).map_or(Value::Null, Value::Number)
    } else {
        // Integer kinds are at most 32 bits wide, exact in i64
        Value::Number(Number::from(v as i64))
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "nested array",
        Value::Object(_) => "object",
    }
}
