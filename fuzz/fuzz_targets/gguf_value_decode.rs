#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use llamakit_gguf::{ByteOrder, GgufValueType, decode_value, encode_value};

#[derive(Arbitrary, Debug)]
struct ValueInput {
    tag: u32,
    big_endian: bool,
    bytes: Vec<u8>,
}

fuzz_target!(|input: ValueInput| {
    let Some(ty) = GgufValueType::from_u32(input.tag % 13) else {
        return;
    };
    let order = if input.big_endian { ByteOrder::Big } else { ByteOrder::Little };

    // Whatever decodes re-encodes no longer than the input and decodes back
    // to the same value.
    if let Ok(value) = decode_value(ty, &input.bytes, order) {
        let encoded = encode_value(&value, order).unwrap();
        assert!(encoded.len() <= input.bytes.len());
        assert_eq!(decode_value(ty, &encoded, order).unwrap(), value);
    }
});
