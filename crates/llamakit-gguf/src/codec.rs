//! Value codec: endian-aware primitive and metadata value encoding.
//!
//! [`Encoder`] writes into any [`Write`]; [`Decoder`] reads from any
//! [`Read`] + [`Seek`] source and checks every declared length against the
//! bytes remaining in the source before reading, so corrupt counts surface as
//! [`GgufError::Truncated`] instead of short reads or huge allocations.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{GgufError, Result};
use crate::types::{ByteOrder, GgufValueType};
use crate::value::{GgufArray, GgufValue};

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

macro_rules! put_num {
    ($($fn:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $fn(&mut self, v: $ty) -> Result<()> {
                let bytes = match self.order {
                    ByteOrder::Little => v.to_le_bytes(),
                    ByteOrder::Big => v.to_be_bytes(),
                };
                self.put(&bytes)
            }
        )*
    };
}

/// Writes GGUF primitives in a fixed byte order.
pub struct Encoder<W> {
    inner: W,
    order: ByteOrder,
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, order: ByteOrder) -> Self {
        Self { inner, order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    put_num! {
        put_u16: u16,
        put_i16: i16,
        put_u32: u32,
        put_i32: i32,
        put_u64: u64,
        put_i64: i64,
        put_f32: f32,
        put_f64: f64,
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.put(&[v])
    }

    pub fn put_i8(&mut self, v: i8) -> Result<()> {
        self.put(&v.to_le_bytes())
    }

    pub fn put_bool(&mut self, v: bool) -> Result<()> {
        self.put(&[u8::from(v)])
    }

    /// u64 length prefix followed by the raw UTF-8 bytes.
    pub fn put_str(&mut self, s: &str) -> Result<()> {
        self.put_u64(s.len() as u64)?;
        self.put(s.as_bytes())
    }

    /// Encode `value` without its type tag.
    pub fn put_value(&mut self, value: &GgufValue) -> Result<()> {
        match value {
            GgufValue::Uint8(v) => self.put_u8(*v),
            GgufValue::Int8(v) => self.put_i8(*v),
            GgufValue::Uint16(v) => self.put_u16(*v),
            GgufValue::Int16(v) => self.put_i16(*v),
            GgufValue::Uint32(v) => self.put_u32(*v),
            GgufValue::Int32(v) => self.put_i32(*v),
            GgufValue::Float32(v) => self.put_f32(*v),
            GgufValue::Bool(v) => self.put_bool(*v),
            GgufValue::String(v) => self.put_str(v),
            GgufValue::Array(a) => {
                self.put_u32(a.elem_type().as_u32())?;
                self.put_u64(a.len() as u64)?;
                a.values().iter().try_for_each(|v| self.put_value(v))
            }
            GgufValue::Uint64(v) => self.put_u64(*v),
            GgufValue::Int64(v) => self.put_i64(*v),
            GgufValue::Float64(v) => self.put_f64(*v),
        }
    }

    /// Encode the u32 type tag followed by `value`.
    pub fn put_tagged_value(&mut self, value: &GgufValue) -> Result<()> {
        self.put_u32(value.value_type().as_u32())?;
        self.put_value(value)
    }
}

/// Encode a value (without tag) into a fresh buffer.
pub fn encode_value(value: &GgufValue, order: ByteOrder) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(Vec::new(), order);
    enc.put_value(value)?;
    Ok(enc.into_inner())
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

macro_rules! get_num {
    ($($fn:ident: $ty:ty = $n:literal),* $(,)?) => {
        $(
            pub fn $fn(&mut self) -> Result<$ty> {
                let bytes = self.take::<$n>()?;
                Ok(match self.order {
                    ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                    ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                })
            }
        )*
    };
}

/// Reads GGUF primitives from a seekable source with bounds checking.
pub struct Decoder<R> {
    inner: R,
    order: ByteOrder,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> Decoder<R> {
    /// Wrap `inner`, measuring its length. Decoding starts at the stream's
    /// current position.
    pub fn new(mut inner: R, order: ByteOrder) -> Result<Self> {
        let position = inner.stream_position()?;
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(position))?;
        Ok(Self { inner, order, position, len })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total length of the source.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fail with [`GgufError::Truncated`] unless `needed` bytes remain.
    pub fn ensure_remaining(&self, needed: u64) -> Result<()> {
        let available = self.remaining();
        if needed > available {
            return Err(GgufError::Truncated { offset: self.position, needed, available });
        }
        Ok(())
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure_remaining(N as u64)?;
        let mut buf = [0u8; N];
        self.read_exact_at_cursor(&mut buf)?;
        Ok(buf)
    }

    fn read_exact_at_cursor(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as u64;
                Ok(())
            }
            // The source shrank underneath us.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(GgufError::Truncated {
                offset: self.position,
                needed: buf.len() as u64,
                available: 0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        self.ensure_remaining(n)?;
        let n = usize::try_from(n).map_err(|_| GgufError::Truncated {
            offset: self.position,
            needed: n,
            available: self.remaining(),
        })?;
        let mut buf = vec![0u8; n];
        self.read_exact_at_cursor(&mut buf)?;
        Ok(buf)
    }

    /// Read into `buf` at an absolute offset, leaving the cursor after it.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.is_none_or(|end| end > self.len) {
            return Err(GgufError::Truncated {
                offset,
                needed: buf.len() as u64,
                available: self.len.saturating_sub(offset),
            });
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        self.read_exact_at_cursor(buf)
    }

    /// Skip forward to `offset`.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(GgufError::Truncated {
                offset: self.len,
                needed: offset - self.len,
                available: 0,
            });
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Read the 4 raw bytes at the cursor without byte-order interpretation.
    pub fn read_raw4(&mut self) -> Result<[u8; 4]> {
        self.take::<4>()
    }

    get_num! {
        read_u16: u16 = 2,
        read_i16: i16 = 2,
        read_u32: u32 = 4,
        read_i32: i32 = 4,
        read_u64: u64 = 8,
        read_i64: i64 = 8,
        read_f32: f32 = 4,
        read_f64: f64 = 8,
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.take::<1>()?))
    }

    /// Any non-zero byte is `true`, as in llama.cpp.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u64()?;
        let start = self.position;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| GgufError::InvalidUtf8 { offset: start })
    }

    /// Read a u32 type tag.
    pub fn read_value_type(&mut self) -> Result<GgufValueType> {
        let offset = self.position;
        let tag = self.read_u32()?;
        GgufValueType::from_u32(tag).ok_or(GgufError::UnknownValueType { tag, offset })
    }

    /// Read a tag followed by a value of that type.
    pub fn read_tagged_value(&mut self) -> Result<GgufValue> {
        let ty = self.read_value_type()?;
        self.read_value(ty)
    }

    /// Decode a value of type `ty`. Nested arrays are decoded with an explicit
    /// stack, so nesting depth is bounded only by the input length.
    pub fn read_value(&mut self, ty: GgufValueType) -> Result<GgufValue> {
        if ty != GgufValueType::Array {
            return self.read_scalar(ty);
        }

        let mut current = self.read_array_header()?;
        let mut parents: Vec<ArrayFrame> = Vec::new();
        loop {
            if (current.values.len() as u64) < current.count {
                if current.elem_type == GgufValueType::Array {
                    let child = self.read_array_header()?;
                    parents.push(std::mem::replace(&mut current, child));
                } else {
                    let v = self.read_scalar(current.elem_type)?;
                    current.values.push(v);
                }
                continue;
            }

            let finished = GgufValue::Array(current.finish());
            match parents.pop() {
                Some(mut parent) => {
                    parent.values.push(finished);
                    current = parent;
                }
                None => return Ok(finished),
            }
        }
    }

    fn read_array_header(&mut self) -> Result<ArrayFrame> {
        let elem_type = self.read_value_type()?;
        let count = self.read_u64()?;
        // Each element needs at least its minimal encoding; reject counts the
        // remaining input cannot possibly hold before allocating for them.
        let min_bytes = count.saturating_mul(elem_type.min_encoded_size());
        self.ensure_remaining(min_bytes)?;
        let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(4096);
        Ok(ArrayFrame { elem_type, count, values: Vec::with_capacity(capacity) })
    }

    fn read_scalar(&mut self, ty: GgufValueType) -> Result<GgufValue> {
        Ok(match ty {
            GgufValueType::Uint8 => GgufValue::Uint8(self.read_u8()?),
            GgufValueType::Int8 => GgufValue::Int8(self.read_i8()?),
            GgufValueType::Uint16 => GgufValue::Uint16(self.read_u16()?),
            GgufValueType::Int16 => GgufValue::Int16(self.read_i16()?),
            GgufValueType::Uint32 => GgufValue::Uint32(self.read_u32()?),
            GgufValueType::Int32 => GgufValue::Int32(self.read_i32()?),
            GgufValueType::Float32 => GgufValue::Float32(self.read_f32()?),
            GgufValueType::Bool => GgufValue::Bool(self.read_bool()?),
            GgufValueType::String => GgufValue::String(self.read_string()?),
            GgufValueType::Uint64 => GgufValue::Uint64(self.read_u64()?),
            GgufValueType::Int64 => GgufValue::Int64(self.read_i64()?),
            GgufValueType::Float64 => GgufValue::Float64(self.read_f64()?),
            GgufValueType::Array => return self.read_value(ty),
        })
    }
}

struct ArrayFrame {
    elem_type: GgufValueType,
    count: u64,
    values: Vec<GgufValue>,
}

impl ArrayFrame {
    fn finish(self) -> GgufArray {
        GgufArray::from_decoded(self.elem_type, self.values)
    }
}

/// Decode a value of type `ty` from the start of `bytes`.
pub fn decode_value(ty: GgufValueType, bytes: &[u8], order: ByteOrder) -> Result<GgufValue> {
    let mut dec = Decoder::new(io::Cursor::new(bytes), order)?;
    dec.read_value(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: &GgufValue, order: ByteOrder) -> GgufValue {
        let bytes = encode_value(v, order).unwrap();
        decode_value(v.value_type(), &bytes, order).unwrap()
    }

    #[test]
    fn scalars_encode_with_fixed_widths() {
        assert_eq!(encode_value(&GgufValue::Uint8(0xAB), ByteOrder::Little).unwrap(), [0xAB]);
        assert_eq!(
            encode_value(&GgufValue::Uint32(0x0102_0304), ByteOrder::Little).unwrap(),
            [4, 3, 2, 1]
        );
        assert_eq!(
            encode_value(&GgufValue::Uint32(0x0102_0304), ByteOrder::Big).unwrap(),
            [1, 2, 3, 4]
        );
        assert_eq!(encode_value(&GgufValue::Bool(true), ByteOrder::Big).unwrap(), [1]);
    }

    #[test]
    fn string_is_length_prefixed_without_terminator() {
        let bytes = encode_value(&GgufValue::String("hi".into()), ByteOrder::Little).unwrap();
        assert_eq!(bytes, [2, 0, 0, 0, 0, 0, 0, 0, b'h', b'i']);
        let empty = encode_value(&GgufValue::String(String::new()), ByteOrder::Little).unwrap();
        assert_eq!(empty, [0u8; 8]);
    }

    #[test]
    fn array_layout_is_tag_count_elements() {
        let v = GgufValue::Array(GgufArray::from_scalars([1u16, 2]));
        let bytes = encode_value(&v, ByteOrder::Little).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&2u32.to_le_bytes()); // Uint16 tag
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&[1, 0, 2, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn boundary_values_roundtrip_in_both_orders() {
        let values = [
            GgufValue::Uint8(u8::MAX),
            GgufValue::Int8(i8::MIN),
            GgufValue::Uint16(u16::MAX),
            GgufValue::Int16(i16::MIN),
            GgufValue::Uint32(u32::MAX),
            GgufValue::Int32(i32::MIN),
            GgufValue::Uint64(u64::MAX),
            GgufValue::Int64(i64::MIN),
            GgufValue::Float32(f32::NEG_INFINITY),
            GgufValue::Float32(f32::from_bits(0x7fc0_0001)),
            GgufValue::Float64(f64::from_bits(0xfff8_0000_0000_0042)),
            GgufValue::Float64(-0.0),
            GgufValue::Bool(false),
            GgufValue::String("ünïcødé ✓".into()),
            GgufValue::Array(GgufArray::empty(GgufValueType::Int64)),
        ];
        for order in [ByteOrder::Little, ByteOrder::Big] {
            for v in &values {
                assert_eq!(&roundtrip(v, order), v, "{v:?} in {order}");
            }
        }
    }

    #[test]
    fn deeply_nested_arrays_roundtrip() {
        let mut v = GgufArray::from_scalars(["leaf"]);
        for _ in 0..2_000 {
            v = GgufArray::from_arrays([v]);
        }
        let v = GgufValue::Array(v);
        assert_eq!(roundtrip(&v, ByteOrder::Little), v);
    }

    #[test]
    fn nested_arrays_with_mixed_inner_types() {
        let v = GgufValue::Array(GgufArray::from_arrays([
            GgufArray::from_scalars([1u8, 2, 3]),
            GgufArray::empty(GgufValueType::String),
            GgufArray::from_scalars([true]),
        ]));
        assert_eq!(roundtrip(&v, ByteOrder::Big), v);
    }

    #[test]
    fn string_length_beyond_input_is_truncation() {
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let err = decode_value(GgufValueType::String, &bytes, ByteOrder::Little).unwrap_err();
        match err {
            GgufError::Truncated { offset, needed, available } => {
                assert_eq!(offset, 8);
                assert_eq!(needed, 100);
                assert_eq!(available, 5);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn huge_array_count_fails_before_allocating() {
        let mut bytes = GgufValueType::Uint64.as_u32().to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = decode_value(GgufValueType::Array, &bytes, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, GgufError::Truncated { offset: 12, .. }), "{err:?}");
    }

    #[test]
    fn unknown_element_tag_reports_offset() {
        let mut bytes = 99u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0u64.to_le_bytes());
        let err = decode_value(GgufValueType::Array, &bytes, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, GgufError::UnknownValueType { tag: 99, offset: 0 }), "{err:?}");
    }

    #[test]
    fn invalid_utf8_is_structural() {
        let mut bytes = 2u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let err = decode_value(GgufValueType::String, &bytes, ByteOrder::Little).unwrap_err();
        assert!(matches!(err, GgufError::InvalidUtf8 { offset: 8 }));
    }

    #[test]
    fn read_at_checks_bounds() {
        let mut dec = Decoder::new(io::Cursor::new(vec![1u8, 2, 3, 4]), ByteOrder::Little).unwrap();
        let mut buf = [0u8; 2];
        dec.read_at(2, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        let err = dec.read_at(3, &mut buf).unwrap_err();
        assert!(matches!(err, GgufError::Truncated { offset: 3, needed: 2, available: 1 }));
    }
}
