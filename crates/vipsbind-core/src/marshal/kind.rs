//! Element kinds: width, signedness and the byte encoding of one element

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{MarshalError, MarshalResult};

/// Width of the length header slot. The slot grows to the element width so
/// that the first element stays aligned.
const MIN_HEADER_WIDTH: usize = 4;

/// Numeric kind of a vector element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[serde(alias = "char")]
    Int8,
    #[serde(alias = "uchar")]
    Uint8,
    #[serde(alias = "short")]
    Int16,
    #[serde(alias = "ushort")]
    Uint16,
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "uint")]
    Uint32,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
}

impl ElementKind {
    /// All supported kinds, narrowest integers first.
    pub const ALL: [ElementKind; 8] = [
        ElementKind::Int8,
        ElementKind::Uint8,
        ElementKind::Int16,
        ElementKind::Uint16,
        ElementKind::Int32,
        ElementKind::Uint32,
        ElementKind::Float32,
        ElementKind::Float64,
    ];

    /// Resolve a kind from the descriptor native code registers a vector
    /// type with: element size in bytes, float flag and signedness.
    ///
    /// Signedness is ignored for floats.
    pub fn from_descriptor(
        name: &str,
        size: usize,
        is_float: bool,
        is_signed: bool,
    ) -> MarshalResult<Self> {
        if is_float {
            return match size {
                4 => Ok(ElementKind::Float32),
                8 => Ok(ElementKind::Float64),
                _ => Err(MarshalError::UnknownFloatType {
                    name: name.to_string(),
                    size,
                }),
            };
        }

        match (size, is_signed) {
            (1, true) => Ok(ElementKind::Int8),
            (1, false) => Ok(ElementKind::Uint8),
            (2, true) => Ok(ElementKind::Int16),
            (2, false) => Ok(ElementKind::Uint16),
            (4, true) => Ok(ElementKind::Int32),
            (4, false) => Ok(ElementKind::Uint32),
            _ => Err(MarshalError::UnknownIntegerType {
                name: name.to_string(),
                size,
            }),
        }
    }

    /// Canonical lowercase name (`int8`, `float64`, ...).
    pub fn name(self) -> &'static str {
        match self {
            ElementKind::Int8 => "int8",
            ElementKind::Uint8 => "uint8",
            ElementKind::Int16 => "int16",
            ElementKind::Uint16 => "uint16",
            ElementKind::Int32 => "int32",
            ElementKind::Uint32 => "uint32",
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
        }
    }

    /// Element width in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementKind::Int8 | ElementKind::Uint8 => 1,
            ElementKind::Int16 | ElementKind::Uint16 => 2,
            ElementKind::Int32 | ElementKind::Uint32 | ElementKind::Float32 => 4,
            ElementKind::Float64 => 8,
        }
    }

    /// Bytes reserved for the length header in front of the first element.
    pub fn header_width(self) -> usize {
        self.width().max(MIN_HEADER_WIDTH)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementKind::Float32 | ElementKind::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ElementKind::Int8
                | ElementKind::Int16
                | ElementKind::Int32
                | ElementKind::Float32
                | ElementKind::Float64
        )
    }

    /// Total buffer size for `len` elements, or `None` on overflow.
    pub fn buffer_size(self, len: usize) -> Option<usize> {
        len.checked_mul(self.width())?
            .checked_add(self.header_width())
    }

    /// Encode a host number into `out`, which must be exactly `width()` bytes.
    ///
    /// Integer kinds follow typed-array store semantics: NaN and infinities
    /// become 0, fractions truncate toward zero and out-of-range values wrap.
    pub(crate) fn store(self, value: f64, out: &mut [u8]) {
        match self {
            ElementKind::Float32 => out.copy_from_slice(&(value as f32).to_le_bytes()),
            ElementKind::Float64 => out.copy_from_slice(&value.to_le_bytes()),
            _ => {
                let bits = wrap_integer(value, self.width() as u32 * 8);
                out.copy_from_slice(&bits.to_le_bytes()[..self.width()]);
            }
        }
    }

    /// Decode one element from `bytes`, which must be exactly `width()` bytes.
    pub(crate) fn load(self, bytes: &[u8]) -> f64 {
        match self {
            ElementKind::Int8 => i8::read_le(bytes).to_host(),
            ElementKind::Uint8 => u8::read_le(bytes).to_host(),
            ElementKind::Int16 => i16::read_le(bytes).to_host(),
            ElementKind::Uint16 => u16::read_le(bytes).to_host(),
            ElementKind::Int32 => i32::read_le(bytes).to_host(),
            ElementKind::Uint32 => u32::read_le(bytes).to_host(),
            ElementKind::Float32 => f32::read_le(bytes).to_host(),
            ElementKind::Float64 => f64::read_le(bytes),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementKind {
    type Err = MarshalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int8" | "char" => Ok(ElementKind::Int8),
            "uint8" | "uchar" => Ok(ElementKind::Uint8),
            "int16" | "short" => Ok(ElementKind::Int16),
            "uint16" | "ushort" => Ok(ElementKind::Uint16),
            "int32" | "int" => Ok(ElementKind::Int32),
            "uint32" | "uint" => Ok(ElementKind::Uint32),
            "float32" | "float" => Ok(ElementKind::Float32),
            "float64" | "double" => Ok(ElementKind::Float64),
            _ => Err(MarshalError::UnknownKind(s.to_string())),
        }
    }
}

/// Reduce a host number to the low `bits` of its integer value.
fn wrap_integer(value: f64, bits: u32) -> u64 {
    if !value.is_finite() {
        return 0;
    }
    let modulus = 2f64.powi(bits as i32);
    let rem = value.trunc() % modulus;
    let rem = if rem < 0.0 { rem + modulus } else { rem };
    rem as u64
}

mod sealed {
    pub trait Sealed {}
}

/// Rust element types with a fixed [`ElementKind`].
///
/// Sealed: the set of kinds is closed.
pub trait Element: Copy + sealed::Sealed {
    const KIND: ElementKind;

    /// Lossless widening to a host number.
    fn to_host(self) -> f64;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;

                #[inline]
                fn to_host(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    f32 => Float32,
    f64 => Float64,
}
