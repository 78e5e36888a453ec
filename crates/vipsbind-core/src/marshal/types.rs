//! Named vector types and the table they are registered in

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use super::destructors::Destructors;
use super::error::{MarshalError, MarshalResult};
use super::heap::{BufferPtr, NativeHeap};
use super::kind::ElementKind;

/// A named arithmetic vector type, e.g. `VectorInt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorType {
    pub name: String,
    pub kind: ElementKind,
}

impl VectorType {
    pub fn new(name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Host -> native. When `destructors` is given the buffer is queued
    /// for release after the call; otherwise the caller owns it.
    pub fn to_wire<H>(
        &self,
        heap: &mut H,
        destructors: Option<&mut Destructors>,
        value: &Value,
    ) -> MarshalResult<BufferPtr>
    where
        H: NativeHeap + ?Sized,
    {
        let flat = codec::flatten(value, &self.name)?;
        let ptr = codec::encode_numbers(heap, &flat, self.kind)?;
        if let Some(destructors) = destructors {
            destructors.push(ptr);
        }
        Ok(ptr)
    }

    /// Native -> host. Consumes (frees) the buffer.
    pub fn from_wire<H>(&self, heap: &mut H, ptr: BufferPtr) -> MarshalResult<Value>
    where
        H: NativeHeap + ?Sized,
    {
        codec::decode_value(heap, ptr, self.kind)
    }
}

/// Registered vector types, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct VectorTypes {
    types: HashMap<String, VectorType>,
}

impl VectorTypes {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `VectorInt` (int32) and `VectorDouble` (float64).
    pub fn with_defaults() -> Self {
        let types = default_vector_types()
            .into_iter()
            .map(|ty| (ty.name.clone(), ty))
            .collect();
        Self { types }
    }

    pub fn register(&mut self, ty: VectorType) -> MarshalResult<()> {
        if self.types.contains_key(&ty.name) {
            return Err(MarshalError::DuplicateVectorType(ty.name));
        }
        tracing::debug!(name = %ty.name, kind = %ty.kind, "registered vector type");
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Register from a native descriptor (element size, float flag, signedness).
    pub fn register_descriptor(
        &mut self,
        name: &str,
        size: usize,
        is_float: bool,
        is_signed: bool,
    ) -> MarshalResult<()> {
        let kind = ElementKind::from_descriptor(name, size, is_float, is_signed)?;
        self.register(VectorType::new(name, kind))
    }

    pub fn get(&self, name: &str) -> MarshalResult<&VectorType> {
        self.types
            .get(name)
            .ok_or_else(|| MarshalError::UnknownVectorType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// The vector types every bridge starts with.
pub fn default_vector_types() -> Vec<VectorType> {
    vec![
        VectorType::new("VectorInt", ElementKind::Int32),
        VectorType::new("VectorDouble", ElementKind::Float64),
    ]
}
