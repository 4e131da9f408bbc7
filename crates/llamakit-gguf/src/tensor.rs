//! Tensor descriptors and the data-section layout.
//!
//! Shapes are row-major (outermost dimension first) everywhere in the API. On
//! disk ggml stores dimensions innermost first, so [`TensorTable::write_to`]
//! reverses them and [`TensorTable::read_from`] restores row-major order.

use std::collections::HashMap;
use std::io::{Read, Seek, Write};

use serde::Serialize;

use crate::codec::{Decoder, Encoder};
use crate::constants::GGML_MAX_DIMS;
use crate::error::{GgufError, Result};
use crate::types::GgufTensorType;

/// Round `value` up to the next multiple of `alignment`.
///
/// # Panics
///
/// Panics if `alignment` is zero or the result overflows `u64`. Callers
/// working with untrusted offsets use [`checked_align_up`].
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    value.next_multiple_of(alignment)
}

/// Overflow-checked [`align_up`].
#[inline]
pub fn checked_align_up(value: u64, alignment: u64) -> Option<u64> {
    value.checked_next_multiple_of(alignment)
}

/// One tensor descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorInfo {
    pub name: String,
    /// Row-major dimensions.
    pub shape: Vec<u64>,
    pub tensor_type: GgufTensorType,
    /// Offset relative to the start of the data section.
    pub offset: u64,
    /// Payload length in bytes, excluding padding.
    pub size: u64,
}

impl TensorInfo {
    pub fn n_dims(&self) -> usize {
        self.shape.len()
    }

    pub fn n_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// End of the payload relative to the data section.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Validate a shape and derive its byte size for `ty`.
pub fn tensor_byte_size(name: &str, shape: &[u64], ty: GgufTensorType) -> Result<u64> {
    let invalid = |reason| GgufError::InvalidShape { name: name.to_owned(), shape: shape.to_vec(), reason };
    if shape.is_empty() {
        return Err(invalid("shape has no dimensions"));
    }
    if shape.len() > GGML_MAX_DIMS {
        return Err(invalid("more than 4 dimensions"));
    }
    if shape.contains(&0) {
        return Err(invalid("dimensions must be greater than zero"));
    }
    ty.byte_size(shape).ok_or_else(|| invalid("byte size overflows u64"))
}

/// Ordered, name-unique tensor descriptors plus their layout.
#[derive(Debug, Clone, Default)]
pub struct TensorTable {
    tensors: Vec<TensorInfo>,
    index: HashMap<String, usize>,
    alignment: Option<u64>,
    data_len: u64,
}

impl TensorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor with a placeholder offset.
    ///
    /// Fails on a duplicate name, an invalid shape, or a `byte_size` that
    /// disagrees with the shape and type. A failed call leaves the table
    /// unchanged.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        shape: &[u64],
        tensor_type: GgufTensorType,
        byte_size: u64,
    ) -> Result<()> {
        let name = name.into();
        if self.is_finalized() {
            return Err(GgufError::illegal_state("add a tensor", "the layout is finalized"));
        }
        if self.index.contains_key(&name) {
            return Err(GgufError::DuplicateTensor { name });
        }
        let expected = tensor_byte_size(&name, shape, tensor_type)?;
        if expected != byte_size {
            return Err(GgufError::TensorSizeMismatch { name, expected, actual: byte_size });
        }
        self.index.insert(name.clone(), self.tensors.len());
        self.tensors.push(TensorInfo { name, shape: shape.to_vec(), tensor_type, offset: 0, size: byte_size });
        Ok(())
    }

    /// Assign offsets: the first tensor starts at 0 and each following one
    /// starts at the aligned end of its predecessor. Idempotent for the same
    /// alignment.
    pub fn finalize(&mut self, alignment: u64) -> Result<()> {
        if !alignment.is_power_of_two() {
            return Err(GgufError::InvalidAlignment { alignment });
        }
        match self.alignment {
            Some(a) if a == alignment => return Ok(()),
            Some(_) => return Err(GgufError::illegal_state("re-finalize", "the layout is finalized")),
            None => {}
        }

        let overflow = |name: &str| GgufError::MalformedTensor {
            name: name.to_owned(),
            reason: "data section exceeds u64 range".into(),
        };
        let mut cursor = 0u64;
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for t in &self.tensors {
            offsets.push(cursor);
            let end = cursor.checked_add(t.size).ok_or_else(|| overflow(&t.name))?;
            cursor = checked_align_up(end, alignment).ok_or_else(|| overflow(&t.name))?;
        }
        for (t, off) in self.tensors.iter_mut().zip(offsets) {
            t.offset = off;
        }
        self.data_len = cursor;
        self.alignment = Some(alignment);
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.alignment.is_some()
    }

    /// Alignment the layout was computed with.
    pub fn alignment(&self) -> Option<u64> {
        self.alignment
    }

    /// Length of the data section including trailing padding. Zero until
    /// finalized.
    pub fn data_section_len(&self) -> u64 {
        self.data_len
    }

    pub fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.index.get(name).map(|&i| &self.tensors[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&TensorInfo> {
        self.tensors.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorInfo> {
        self.tensors.iter()
    }

    pub fn as_slice(&self) -> &[TensorInfo] {
        &self.tensors
    }

    /// Encode every descriptor. The layout must be finalized.
    pub fn write_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<()> {
        if !self.is_finalized() {
            return Err(GgufError::illegal_state("write tensor descriptors", "the layout is not finalized"));
        }
        for t in &self.tensors {
            enc.put_str(&t.name)?;
            enc.put_u32(t.shape.len() as u32)?;
            for &d in t.shape.iter().rev() {
                enc.put_u64(d)?;
            }
            enc.put_u32(t.tensor_type.as_u32())?;
            enc.put_u64(t.offset)?;
        }
        Ok(())
    }

    /// Decode `count` descriptors and validate their stored offsets against
    /// `alignment`.
    pub fn read_from<R: Read + Seek>(dec: &mut Decoder<R>, count: u64, alignment: u64) -> Result<Self> {
        // Smallest descriptor: name length + n_dims + one dim + type + offset.
        dec.ensure_remaining(count.saturating_mul(32))?;
        let mut tensors = Vec::with_capacity(usize::try_from(count).unwrap_or(0).min(4096));
        for _ in 0..count {
            tensors.push(read_descriptor(dec)?);
        }
        Self::from_parsed(tensors, alignment)
    }

    fn from_parsed(tensors: Vec<TensorInfo>, alignment: u64) -> Result<Self> {
        let malformed = |name: &str, reason: String| GgufError::MalformedTensor { name: name.to_owned(), reason };
        let mut index = HashMap::with_capacity(tensors.len());
        let mut prev_end = 0u64;
        for (i, t) in tensors.iter().enumerate() {
            if index.insert(t.name.clone(), i).is_some() {
                return Err(malformed(&t.name, "name appears more than once".into()));
            }
            if t.offset % alignment != 0 {
                return Err(malformed(&t.name, format!("offset {} is not a multiple of {alignment}", t.offset)));
            }
            if t.offset < prev_end {
                return Err(malformed(
                    &t.name,
                    format!("offset {} overlaps the previous tensor ending at {prev_end}", t.offset),
                ));
            }
            prev_end = t
                .offset
                .checked_add(t.size)
                .ok_or_else(|| malformed(&t.name, "payload end exceeds u64 range".into()))?;
        }
        let data_len = checked_align_up(prev_end, alignment)
            .ok_or_else(|| GgufError::MalformedTensor { name: String::new(), reason: "data section exceeds u64 range".into() })?;
        Ok(Self { tensors, index, alignment: Some(alignment), data_len })
    }
}

impl<'a> IntoIterator for &'a TensorTable {
    type Item = &'a TensorInfo;
    type IntoIter = std::slice::Iter<'a, TensorInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

fn read_descriptor<R: Read + Seek>(dec: &mut Decoder<R>) -> Result<TensorInfo> {
    let name = dec.read_string()?;
    let n_dims = dec.read_u32()?;
    if n_dims == 0 || n_dims as usize > GGML_MAX_DIMS {
        return Err(GgufError::MalformedTensor {
            name,
            reason: format!("{n_dims} dimensions, expected 1..={GGML_MAX_DIMS}"),
        });
    }
    let mut shape = Vec::with_capacity(n_dims as usize);
    for _ in 0..n_dims {
        shape.push(dec.read_u64()?);
    }
    shape.reverse();

    let type_offset = dec.position();
    let tag = dec.read_u32()?;
    let tensor_type = GgufTensorType::from_u32(tag)
        .ok_or_else(|| GgufError::UnknownTensorType { tag, name: name.clone(), offset: type_offset })?;
    let offset = dec.read_u64()?;

    let size = match tensor_byte_size(&name, &shape, tensor_type) {
        Ok(size) => size,
        Err(GgufError::InvalidShape { name, reason, .. }) => {
            return Err(GgufError::MalformedTensor { name, reason: reason.to_owned() });
        }
        Err(e) => return Err(e),
    };
    Ok(TensorInfo { name, shape, tensor_type, offset, size })
}
