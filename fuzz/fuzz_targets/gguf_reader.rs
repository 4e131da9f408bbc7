#![no_main]

use libfuzzer_sys::fuzz_target;
use llamakit_gguf::{GgufReader, LoadMode, ReaderOptions};

fuzz_target!(|data: &[u8]| {
    // Eager mode exercises payload bounds; lazy mode the per-request path.
    for load_mode in [LoadMode::Lazy, LoadMode::Eager] {
        let Ok(mut reader) = GgufReader::from_bytes(data.to_vec(), &ReaderOptions { load_mode }) else {
            continue;
        };

        let data_offset = reader.data_offset().unwrap();
        let file_len = reader.file_len().unwrap();
        assert_eq!(data_offset % reader.alignment().unwrap(), 0);
        let _ = reader.get_fields().unwrap().iter().count();

        let tensors = reader.get_tensors().unwrap().to_vec();
        for t in tensors.iter().take(64) {
            let bytes = reader.tensor_data(&t.name).expect("validated payload must be readable");
            assert_eq!(bytes.len() as u64, t.size);
            assert!(data_offset + t.end() <= file_len);
        }
    }
});
