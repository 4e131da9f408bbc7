//! Typed metadata values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GgufError, Result};
use crate::types::GgufValueType;

/// A GGUF metadata value.
///
/// Equality compares floats by bit pattern so that NaN payloads and signed
/// zeros survive a round trip observably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(GgufArray),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl GgufValue {
    pub const fn value_type(&self) -> GgufValueType {
        match self {
            Self::Uint8(_) => GgufValueType::Uint8,
            Self::Int8(_) => GgufValueType::Int8,
            Self::Uint16(_) => GgufValueType::Uint16,
            Self::Int16(_) => GgufValueType::Int16,
            Self::Uint32(_) => GgufValueType::Uint32,
            Self::Int32(_) => GgufValueType::Int32,
            Self::Float32(_) => GgufValueType::Float32,
            Self::Bool(_) => GgufValueType::Bool,
            Self::String(_) => GgufValueType::String,
            Self::Array(_) => GgufValueType::Array,
            Self::Uint64(_) => GgufValueType::Uint64,
            Self::Int64(_) => GgufValueType::Int64,
            Self::Float64(_) => GgufValueType::Float64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&GgufArray> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl PartialEq for GgufValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Uint8(a), Self::Uint8(b)) => a == b,
            (Self::Int8(a), Self::Int8(b)) => a == b,
            (Self::Uint16(a), Self::Uint16(b)) => a == b,
            (Self::Int16(a), Self::Int16(b)) => a == b,
            (Self::Uint32(a), Self::Uint32(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::Float32(a), Self::Float32(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Uint64(a), Self::Uint64(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl fmt::Display for GgufValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint8(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Uint16(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Uint32(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Array(a) => {
                f.write_str("[")?;
                for (i, v) in a.values().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Uint64(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar conversions
// ---------------------------------------------------------------------------

/// Rust types that map onto exactly one GGUF value type.
pub trait GgufScalar: Into<GgufValue> {
    const VALUE_TYPE: GgufValueType;
}

macro_rules! scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for GgufValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl GgufScalar for $ty {
                const VALUE_TYPE: GgufValueType = GgufValueType::$variant;
            }
        )*
    };
}

scalar! {
    u8 => Uint8,
    i8 => Int8,
    u16 => Uint16,
    i16 => Int16,
    u32 => Uint32,
    i32 => Int32,
    f32 => Float32,
    bool => Bool,
    String => String,
    u64 => Uint64,
    i64 => Int64,
    f64 => Float64,
}

impl From<&str> for GgufValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl GgufScalar for &str {
    const VALUE_TYPE: GgufValueType = GgufValueType::String;
}

impl From<GgufArray> for GgufValue {
    fn from(v: GgufArray) -> Self {
        Self::Array(v)
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// A homogeneous array value. The element type is kept even when empty so that
/// the encoded tag survives a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray", into = "RawArray")]
pub struct GgufArray {
    elem_type: GgufValueType,
    values: Vec<GgufValue>,
}

impl GgufArray {
    /// Build an array, checking that every element has `elem_type`.
    pub fn new(elem_type: GgufValueType, values: Vec<GgufValue>) -> Result<Self> {
        if let Some((index, bad)) =
            values.iter().enumerate().find(|(_, v)| v.value_type() != elem_type)
        {
            return Err(GgufError::ArrayTypeMismatch {
                expected: elem_type,
                found: bad.value_type(),
                index,
            });
        }
        Ok(Self { elem_type, values })
    }

    pub fn empty(elem_type: GgufValueType) -> Self {
        Self { elem_type, values: Vec::new() }
    }

    /// Build an array from Rust scalars; the element type follows `T`.
    pub fn from_scalars<T: GgufScalar>(items: impl IntoIterator<Item = T>) -> Self {
        Self { elem_type: T::VALUE_TYPE, values: items.into_iter().map(Into::into).collect() }
    }

    /// Build an array of nested arrays. Inner arrays may have differing
    /// element types, as the format allows.
    pub fn from_arrays(items: impl IntoIterator<Item = GgufArray>) -> Self {
        Self {
            elem_type: GgufValueType::Array,
            values: items.into_iter().map(GgufValue::Array).collect(),
        }
    }

    /// Used by the decoder, which guarantees homogeneity itself.
    pub(crate) fn from_decoded(elem_type: GgufValueType, values: Vec<GgufValue>) -> Self {
        Self { elem_type, values }
    }

    pub fn elem_type(&self) -> GgufValueType {
        self.elem_type
    }

    pub fn values(&self) -> &[GgufValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<GgufValue> {
        self.values
    }

    /// All elements as strings, if this is a string array.
    pub fn as_strings(&self) -> Option<Vec<&str>> {
        self.values.iter().map(GgufValue::as_str).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct RawArray {
    elem_type: GgufValueType,
    values: Vec<GgufValue>,
}

impl TryFrom<RawArray> for GgufArray {
    type Error = GgufError;

    fn try_from(raw: RawArray) -> Result<Self> {
        Self::new(raw.elem_type, raw.values)
    }
}

impl From<GgufArray> for RawArray {
    fn from(a: GgufArray) -> Self {
        Self { elem_type: a.elem_type, values: a.values }
    }
}
