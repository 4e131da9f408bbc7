//! End-to-end write/read tests.
//!
//! Covers the LoRA adapter scenario, every metadata value type, bit-exact
//! floats, nested arrays, big-endian files, custom alignment, eager vs lazy
//! loading and the exact byte layout of a minimal file.

use std::io::Cursor;

use llamakit_gguf::constants::{GGML_QUANTIZATION_VERSION, keys};
use llamakit_gguf::{
    ByteOrder, GgufArray, GgufReader, GgufTensorType, GgufValue, GgufValueType, GgufWriter, IoSink, LoadMode,
    ReaderOptions, WriterOptions,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type VecWriter = GgufWriter<IoSink<Vec<u8>>>;

fn writer(order: ByteOrder) -> VecWriter {
    let opts = WriterOptions { byte_order: order, ..Default::default() };
    GgufWriter::new(Vec::new(), "llama", &opts).unwrap()
}

fn lazy() -> ReaderOptions {
    ReaderOptions { load_mode: LoadMode::Lazy }
}

fn eager() -> ReaderOptions {
    ReaderOptions { load_mode: LoadMode::Eager }
}

/// Deterministic, non-repeating payload bytes.
fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn all_value_types() -> Vec<(&'static str, GgufValue)> {
    vec![
        ("t.u8", GgufValue::Uint8(u8::MAX)),
        ("t.i8", GgufValue::Int8(i8::MIN)),
        ("t.u16", GgufValue::Uint16(0xBEEF)),
        ("t.i16", GgufValue::Int16(-12345)),
        ("t.u32", GgufValue::Uint32(u32::MAX)),
        ("t.i32", GgufValue::Int32(i32::MIN)),
        ("t.u64", GgufValue::Uint64(u64::MAX)),
        ("t.i64", GgufValue::Int64(i64::MIN)),
        ("t.f32", GgufValue::Float32(3.5)),
        ("t.f32.nan", GgufValue::Float32(f32::from_bits(0x7fc0_beef))),
        ("t.f32.inf", GgufValue::Float32(f32::INFINITY)),
        ("t.f64", GgufValue::Float64(-0.0)),
        ("t.f64.nan", GgufValue::Float64(f64::from_bits(0xfff0_0000_0000_0001))),
        ("t.bool", GgufValue::Bool(true)),
        ("t.str", GgufValue::String("Grüße, 世界".into())),
        ("t.str.empty", GgufValue::String(String::new())),
        ("t.arr.empty", GgufValue::Array(GgufArray::empty(GgufValueType::Float32))),
        ("t.arr.tokens", GgufValue::Array(GgufArray::from_scalars(["<s>", "</s>", ""]))),
        (
            "t.arr.nested",
            GgufValue::Array(GgufArray::from_arrays([
                GgufArray::from_scalars([1i64, -1]),
                GgufArray::empty(GgufValueType::Bool),
                GgufArray::from_arrays([GgufArray::from_scalars([0.25f64])]),
            ])),
        ),
    ]
}

// ---------------------------------------------------------------------------
// 1. LoRA adapter scenario
// ---------------------------------------------------------------------------

#[test]
fn lora_adapter_roundtrip() {
    let mut w = writer(ByteOrder::Little);
    w.add_adapter_type("lora").unwrap();
    w.add_lora_alpha(16.0).unwrap();
    w.add_quantization_version(GGML_QUANTIZATION_VERSION).unwrap();
    w.add_tensor_info("blk.0.attn_q.weight.lora_a", &[8, 4096], GgufTensorType::F32, 131_072).unwrap();
    w.add_tensor_info("blk.0.attn_q.weight.lora_b", &[4096, 8], GgufTensorType::F32, 131_072).unwrap();
    w.write_header_and_tables().unwrap();
    let a = payload(131_072, 1);
    let b = payload(131_072, 2);
    w.write_tensor_payload(&a).unwrap();
    w.write_tensor_payload(&b).unwrap();
    let bytes = w.into_inner().unwrap();

    let mut r = GgufReader::from_bytes(bytes, &lazy()).unwrap();
    assert_eq!(r.tensor_count().unwrap(), 2);
    assert!(r.field_count().unwrap() >= 4);
    assert_eq!(r.get_field(keys::general::ARCHITECTURE).unwrap().and_then(GgufValue::as_str), Some("llama"));
    assert_eq!(r.get_field(keys::adapter::TYPE).unwrap().and_then(GgufValue::as_str), Some("lora"));
    assert_eq!(r.get_field(keys::adapter::LORA_ALPHA).unwrap(), Some(&GgufValue::Float32(16.0)));
    assert_eq!(r.get_field(keys::general::QUANTIZATION_VERSION).unwrap(), Some(&GgufValue::Uint32(2)));

    let info = r.get_tensor("blk.0.attn_q.weight.lora_b").unwrap().unwrap().clone();
    assert_eq!(info.shape, [4096, 8]);
    assert_eq!(info.tensor_type, GgufTensorType::F32);
    assert_eq!(info.size, 131_072);

    assert_eq!(*r.tensor_data("blk.0.attn_q.weight.lora_a").unwrap(), *a);
    assert_eq!(*r.tensor_data("blk.0.attn_q.weight.lora_b").unwrap(), *b);
}

// ---------------------------------------------------------------------------
// 2. Metadata values
// ---------------------------------------------------------------------------

#[test]
fn every_value_type_roundtrips_bit_exact() {
    for order in [ByteOrder::Little, ByteOrder::Big] {
        let mut w = writer(order);
        for (key, value) in all_value_types() {
            w.add_value(key, value).unwrap();
        }
        w.write_header_and_tables().unwrap();
        let bytes = w.into_inner().unwrap();

        let r = GgufReader::from_bytes(bytes, &lazy()).unwrap();
        assert_eq!(r.byte_order().unwrap(), order);
        for (key, value) in all_value_types() {
            assert_eq!(r.get_field(key).unwrap(), Some(&value), "{key} in {order}");
        }
    }
}

#[test]
fn metadata_order_is_preserved() {
    let mut w = writer(ByteOrder::Little);
    for key in ["z", "a", "m", "b"] {
        w.add_bool(key, true).unwrap();
    }
    w.write_header_and_tables().unwrap();
    let r = GgufReader::from_bytes(w.into_inner().unwrap(), &lazy()).unwrap();
    let order: Vec<&str> = r.get_fields().unwrap().keys().collect();
    assert_eq!(order, [keys::general::ARCHITECTURE, "z", "a", "m", "b"]);
}

#[test]
fn nan_payloads_survive() {
    let mut w = writer(ByteOrder::Little);
    let quiet = f32::from_bits(0x7fc0_0001);
    let signalling = f32::from_bits(0x7f80_0001);
    w.add_f32("q", quiet).unwrap();
    w.add_f32("s", signalling).unwrap();
    w.write_header_and_tables().unwrap();
    let r = GgufReader::from_bytes(w.into_inner().unwrap(), &lazy()).unwrap();
    assert_eq!(r.get_field("q").unwrap().and_then(GgufValue::as_f32).map(f32::to_bits), Some(0x7fc0_0001));
    assert_eq!(r.get_field("s").unwrap().and_then(GgufValue::as_f32).map(f32::to_bits), Some(0x7f80_0001));
}

// ---------------------------------------------------------------------------
// 3. Layout
// ---------------------------------------------------------------------------

#[test]
fn offsets_are_aligned_and_ordered() {
    let mut w = writer(ByteOrder::Little);
    let sizes = [(vec![3u64], 12u64), (vec![1], 4), (vec![2, 5], 40), (vec![17], 68)];
    for (i, (shape, size)) in sizes.iter().enumerate() {
        w.add_tensor_info(format!("t{i}"), shape, GgufTensorType::F32, *size).unwrap();
    }
    w.write_header_and_tables().unwrap();
    for (i, (_, size)) in sizes.iter().enumerate() {
        w.write_tensor_payload(&payload(*size as usize, i as u8)).unwrap();
    }
    let r = GgufReader::from_bytes(w.into_inner().unwrap(), &lazy()).unwrap();
    let data_offset = r.data_offset().unwrap();
    assert_eq!(data_offset % 32, 0);
    let tensors = r.get_tensors().unwrap();
    let mut prev_end = 0;
    for t in tensors {
        assert_eq!(t.offset % 32, 0, "{}", t.name);
        assert!(t.offset >= prev_end, "{} overlaps", t.name);
        assert_eq!(r.tensor_file_offset(&t.name).unwrap(), data_offset + t.offset);
        prev_end = t.offset + t.size;
    }
}

#[test]
fn custom_alignment_is_honoured() {
    let opts = WriterOptions { alignment: Some(64), ..Default::default() };
    let mut w = GgufWriter::new(Vec::new(), "llama", &opts).unwrap();
    w.add_tensor_info("a", &[5], GgufTensorType::I8, 5).unwrap();
    w.add_tensor_info("b", &[5], GgufTensorType::I8, 5).unwrap();
    w.write_header_and_tables().unwrap();
    w.write_tensor_payload(b"hello").unwrap();
    w.write_tensor_payload(b"world").unwrap();
    let bytes = w.into_inner().unwrap();

    let mut r = GgufReader::from_bytes(bytes.clone(), &lazy()).unwrap();
    assert_eq!(r.alignment().unwrap(), 64);
    assert_eq!(r.data_offset().unwrap() % 64, 0);
    assert_eq!(r.get_tensor("b").unwrap().unwrap().offset, 64);
    assert_eq!(&*r.tensor_data("b").unwrap(), b"world");
    assert_eq!(bytes.len() as u64, r.data_offset().unwrap() + 128);
}

#[test]
fn quantized_tensor_roundtrip() {
    let mut w = writer(ByteOrder::Little);
    // 2 rows of 300 elements: 2 Q4_K blocks per row.
    w.add_tensor_info("q", &[2, 300], GgufTensorType::Q4_K, 2 * 2 * 144).unwrap();
    w.write_header_and_tables().unwrap();
    let data = payload(576, 9);
    w.write_tensor_payload(&data).unwrap();
    let mut r = GgufReader::from_bytes(w.into_inner().unwrap(), &lazy()).unwrap();
    let info = r.get_tensor("q").unwrap().unwrap();
    assert_eq!((info.shape.as_slice(), info.tensor_type, info.size), (&[2u64, 300][..], GgufTensorType::Q4_K, 576));
    assert_eq!(*r.tensor_data("q").unwrap(), *data);
}

#[test]
fn golden_minimal_file_layout() {
    let mut w = GgufWriter::new(Vec::new(), "x", &WriterOptions::default()).unwrap();
    w.add_tensor_info("t", &[1], GgufTensorType::I8, 1).unwrap();
    w.write_header_and_tables().unwrap();
    w.write_tensor_payload(&[0x7f]).unwrap();
    let bytes = w.into_inner().unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(b"GGUF");
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&1u64.to_le_bytes()); // tensors
    expected.extend_from_slice(&1u64.to_le_bytes()); // kv
    expected.extend_from_slice(&20u64.to_le_bytes());
    expected.extend_from_slice(b"general.architecture");
    expected.extend_from_slice(&8u32.to_le_bytes()); // STRING
    expected.extend_from_slice(&1u64.to_le_bytes());
    expected.extend_from_slice(b"x");
    expected.extend_from_slice(&1u64.to_le_bytes());
    expected.extend_from_slice(b"t");
    expected.extend_from_slice(&1u32.to_le_bytes()); // n_dims
    expected.extend_from_slice(&1u64.to_le_bytes()); // ne[0]
    expected.extend_from_slice(&24u32.to_le_bytes()); // I8
    expected.extend_from_slice(&0u64.to_le_bytes()); // offset
    assert_eq!(expected.len(), 98);
    expected.resize(128, 0);
    expected.push(0x7f);
    expected.resize(160, 0);

    assert_eq!(bytes, expected);
}

#[test]
fn big_endian_tables_are_swapped_but_magic_is_not() {
    let mut w = writer(ByteOrder::Big);
    w.add_tensor_info("t", &[2, 3], GgufTensorType::F32, 24).unwrap();
    w.write_header_and_tables().unwrap();
    let data = payload(24, 3);
    w.write_tensor_payload(&data).unwrap();
    let bytes = w.into_inner().unwrap();
    assert_eq!(&bytes[..4], b"GGUF");
    assert_eq!(&bytes[4..8], &3u32.to_be_bytes());

    let mut r = GgufReader::from_bytes(bytes, &eager()).unwrap();
    assert_eq!(r.byte_order().unwrap(), ByteOrder::Big);
    assert_eq!(r.get_tensor("t").unwrap().unwrap().shape, [2, 3]);
    assert_eq!(*r.tensor_data("t").unwrap(), *data);
}

// ---------------------------------------------------------------------------
// 4. Loading modes and sources
// ---------------------------------------------------------------------------

#[test]
fn eager_and_lazy_agree() {
    let mut w = writer(ByteOrder::Little);
    w.add_u32("llama.block_count", 1).unwrap();
    w.add_tensor_info("a", &[7], GgufTensorType::F16, 14).unwrap();
    w.add_tensor_info("b", &[3, 3], GgufTensorType::I32, 36).unwrap();
    w.write_header_and_tables().unwrap();
    w.write_tensor_payload(&payload(14, 5)).unwrap();
    w.write_tensor_payload(&payload(36, 6)).unwrap();
    let bytes = w.into_inner().unwrap();

    let mut l = GgufReader::from_reader(Cursor::new(bytes.clone()), &lazy()).unwrap();
    let mut e = GgufReader::from_reader(Cursor::new(bytes), &eager()).unwrap();
    assert_eq!(l.get_fields().unwrap(), e.get_fields().unwrap());
    assert_eq!(l.get_tensors().unwrap(), e.get_tensors().unwrap());
    assert_eq!(l.data_offset().unwrap(), e.data_offset().unwrap());
    for name in ["a", "b", "a"] {
        assert_eq!(*l.tensor_data(name).unwrap(), *e.tensor_data(name).unwrap(), "{name}");
    }
}

#[test]
fn file_roundtrip_through_create_open_and_mmap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.gguf");

    let mut w = GgufWriter::create(&path, "llama", &WriterOptions::default()).unwrap();
    w.add_name("tiny").unwrap();
    w.add_tensor_info("w", &[4, 4], GgufTensorType::F32, 64).unwrap();
    let estimate = w.estimated_size().unwrap();
    w.write_header_and_tables().unwrap();
    w.write_tensor_payload(&payload(64, 0)).unwrap();
    w.close().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), estimate);

    let mut r = GgufReader::open(&path).unwrap();
    assert_eq!(r.get_field(keys::general::NAME).unwrap().and_then(GgufValue::as_str), Some("tiny"));
    assert_eq!(*r.tensor_data("w").unwrap(), *payload(64, 0));

    let mut m = GgufReader::open_mmap(&path, &eager()).unwrap();
    assert_eq!(m.file_len().unwrap(), estimate);
    assert_eq!(*m.tensor_data("w").unwrap(), *payload(64, 0));
}
