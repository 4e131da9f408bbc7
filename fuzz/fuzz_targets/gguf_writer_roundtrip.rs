#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use llamakit_gguf::{ByteOrder, GgufReader, GgufTensorType, GgufWriter, ReaderOptions, WriterOptions};

/// A small writer session.
#[derive(Arbitrary, Debug)]
struct Session {
    big_endian: bool,
    alignment_shift: u8,
    entries: Vec<(String, u32)>,
    tensors: Vec<TensorInput>,
}

#[derive(Arbitrary, Debug)]
struct TensorInput {
    name: String,
    dims: Vec<u8>,
    type_index: u8,
}

fuzz_target!(|input: Session| {
    if input.entries.len() > 32 || input.tensors.len() > 16 {
        return;
    }
    let order = if input.big_endian { ByteOrder::Big } else { ByteOrder::Little };
    let opts = WriterOptions { byte_order: order, alignment: Some(1 << (input.alignment_shift % 8)), ..Default::default() };
    let mut w = GgufWriter::new(Vec::new(), "fuzz", &opts).unwrap();

    // Invalid declarations are rejected and leave the session usable.
    for (key, value) in &input.entries {
        let _ = w.add_u32(key.clone(), *value);
    }
    let mut payloads = Vec::new();
    for t in &input.tensors {
        let shape: Vec<u64> = t.dims.iter().take(5).map(|&d| u64::from(d)).collect();
        let ty = GgufTensorType::ALL[usize::from(t.type_index) % GgufTensorType::ALL.len()];
        let Some(size) = ty.byte_size(&shape) else {
            continue;
        };
        if size > 1 << 16 {
            continue;
        }
        if w.add_tensor_info(t.name.clone(), &shape, ty, size).is_ok() {
            payloads.push((t.name.clone(), vec![t.type_index; size as usize]));
        }
    }

    let estimate = w.estimated_size().unwrap();
    w.write_header_and_tables().unwrap();
    for (_, data) in &payloads {
        w.write_tensor_payload(data).unwrap();
    }
    let bytes = w.into_inner().unwrap();
    assert_eq!(bytes.len() as u64, estimate);

    let mut r = GgufReader::from_bytes(bytes, &ReaderOptions::default()).unwrap();
    assert_eq!(r.byte_order().unwrap(), order);
    assert_eq!(r.tensor_count().unwrap(), payloads.len());
    for (name, data) in &payloads {
        assert_eq!(&*r.tensor_data(name).unwrap(), data.as_slice());
    }
});
