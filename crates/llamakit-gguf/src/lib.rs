//! GGUF container reader and writer.
//!
//! Reads and writes the GGUF v3 layout used by llama.cpp for model and adapter
//! files, byte for byte:
//!
//! ```text
//! +--------------------------------------------+
//! | magic "GGUF" | version u32 | n_tensors u64 |
//! | n_kv u64                                   |
//! +--------------------------------------------+
//! | metadata: (key, type tag, value) * n_kv    |
//! +--------------------------------------------+
//! | tensor descriptors * n_tensors             |
//! |   (name, n_dims, dims innermost-first,     |
//! |    type tag, offset)                       |
//! +--------------------------------------------+
//! | zero padding to `general.alignment`        |
//! +--------------------------------------------+
//! | payload 0 | pad | payload 1 | pad | ...    |
//! +--------------------------------------------+
//! ```
//!
//! Every multi-byte field uses one byte order per file; big-endian files are
//! detected from the version field.
//!
//! # Example
//!
//! ```no_run
//! use llamakit_gguf::{GgufReader, GgufTensorType, GgufWriter, WriterOptions};
//!
//! # fn main() -> llamakit_gguf::Result<()> {
//! let file = std::fs::File::create("adapter.gguf")?;
//! let mut writer = GgufWriter::new(file, "llama", &WriterOptions::default())?;
//! writer.add_adapter_type("lora")?;
//! writer.add_lora_alpha(16.0)?;
//! writer.add_tensor_info("blk.0.attn_q.weight.lora_a", &[8, 4096], GgufTensorType::F32, 131_072)?;
//! writer.write_header_and_tables()?;
//! writer.write_tensor_payload(&vec![0u8; 131_072])?;
//! writer.close()?;
//!
//! let mut reader = GgufReader::open("adapter.gguf")?;
//! let data = reader.tensor_data("blk.0.attn_q.weight.lora_a")?;
//! assert_eq!(data.len(), 131_072);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod constants;
pub mod editor;
pub mod error;
pub mod hash;
pub mod header;
pub mod inspect;
pub mod metadata;
pub mod reader;
pub mod sink;
pub mod tensor;
pub mod types;
pub mod value;
pub mod writer;

pub use codec::{Decoder, Encoder, decode_value, encode_value};
pub use constants::{GGML_MAX_DIMS, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
pub use editor::{EditOperation, EditOptions, EditReport, MetadataEditor, load_operations};
pub use error::{ErrorKind, GgufError, Result};
pub use hash::{HashAlgorithm, HashReport, Verification, hash_directory, hash_file, hash_files, verify};
pub use header::GgufHeader;
pub use inspect::{InspectOptions, InspectionReport, inspect, inspect_file};
pub use metadata::MetadataTable;
pub use reader::{GgufReader, LoadMode, ReaderOptions};
pub use sink::{CountingSink, IoSink, Sink};
pub use tensor::{TensorInfo, TensorTable, align_up};
pub use types::{ByteOrder, GgufTensorType, GgufValueType};
pub use value::{GgufArray, GgufScalar, GgufValue};
pub use writer::{GgufWriter, WriterOptions, WriterState};
