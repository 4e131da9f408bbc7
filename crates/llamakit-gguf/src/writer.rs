//! Streaming GGUF writer.
//!
//! A session moves through three states:
//!
//! ```text
//! Building --write_header_and_tables / estimated_size--> Finalized --last payload--> Written
//! ```
//!
//! Metadata and tensor descriptors may only be added while building. Once the
//! tables are written, each tensor payload is streamed exactly once in the
//! order its descriptor was added. Any sequencing mistake poisons the writer,
//! after which every call fails with [`GgufError::IllegalState`].
//!
//! A writer is a plain single-owner value with no internal locking.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::Encoder;
use crate::constants::{GGUF_DEFAULT_ALIGNMENT, keys};
use crate::error::{GgufError, Result};
use crate::header::GgufHeader;
use crate::metadata::MetadataTable;
use crate::sink::{CountingSink, IoSink, Sink, pad_to_alignment};
use crate::tensor::TensorTable;
use crate::types::{ByteOrder, GgufTensorType};
use crate::value::{GgufArray, GgufValue};

/// Writer configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    pub byte_order: ByteOrder,
    /// Count bytes instead of writing them. Honored by [`GgufWriter::new`]
    /// and [`GgufWriter::create`]; [`GgufWriter::with_sink`] defers to the
    /// sink.
    pub dry_run: bool,
    /// Recorded as `general.alignment` when set.
    pub alignment: Option<u32>,
}

/// Lifecycle of a write session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Building,
    Finalized,
    Written,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Building => "building",
            Self::Finalized => "finalized",
            Self::Written => "written",
        })
    }
}

macro_rules! typed_adders {
    ($($fn:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $fn(&mut self, key: impl Into<String>, value: $ty) -> Result<()> {
                self.add_value(key, GgufValue::from(value))
            }
        )*
    };
}

pub struct GgufWriter<S: Sink> {
    sink: S,
    byte_order: ByteOrder,
    metadata: MetadataTable,
    tensors: TensorTable,
    state: WriterState,
    tables_written: bool,
    next_tensor: usize,
    data_start: u64,
    poisoned: bool,
    closed: bool,
}

impl<S: Sink> GgufWriter<S> {
    /// Start a session on an arbitrary sink. Only the configured alignment is
    /// recorded; callers add `general.architecture` themselves.
    pub fn with_sink(sink: S, options: &WriterOptions) -> Result<Self> {
        let mut writer = Self {
            sink,
            byte_order: options.byte_order,
            metadata: MetadataTable::new(),
            tensors: TensorTable::new(),
            state: WriterState::Building,
            tables_written: false,
            next_tensor: 0,
            data_start: 0,
            poisoned: false,
            closed: false,
        };
        if let Some(alignment) = options.alignment {
            writer.add_alignment(alignment)?;
        }
        Ok(writer)
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn is_dry_run(&self) -> bool {
        self.sink.is_dry_run()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    pub fn tensors(&self) -> &TensorTable {
        &self.tensors
    }

    /// Bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.sink.position()
    }

    /// Absolute offset of the data section; zero until the tables are written.
    pub fn data_offset(&self) -> u64 {
        self.data_start
    }

    /// Alignment in effect: `general.alignment` if present, else 32.
    pub fn alignment(&self) -> u64 {
        // The key is validated on insertion.
        match self.metadata.alignment() {
            Ok(Some(a)) => u64::from(a),
            _ => u64::from(GGUF_DEFAULT_ALIGNMENT),
        }
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Add a metadata entry. Fails on a duplicate key without changing the
    /// table.
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<GgufValue>) -> Result<()> {
        self.check_mutable("add metadata")?;
        self.metadata.insert(key, value)
    }

    typed_adders! {
        add_u8: u8,
        add_i8: i8,
        add_u16: u16,
        add_i16: i16,
        add_u32: u32,
        add_i32: i32,
        add_u64: u64,
        add_i64: i64,
        add_f32: f32,
        add_f64: f64,
        add_bool: bool,
    }

    pub fn add_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.add_value(key, GgufValue::String(value.into()))
    }

    pub fn add_array(&mut self, key: impl Into<String>, value: GgufArray) -> Result<()> {
        self.add_value(key, GgufValue::Array(value))
    }

    pub fn add_architecture(&mut self, arch: &str) -> Result<()> {
        self.add_string(keys::general::ARCHITECTURE, arch)
    }

    pub fn add_type(&mut self, file_type: &str) -> Result<()> {
        self.add_string(keys::general::TYPE, file_type)
    }

    pub fn add_name(&mut self, name: &str) -> Result<()> {
        self.add_string(keys::general::NAME, name)
    }

    pub fn add_description(&mut self, description: &str) -> Result<()> {
        self.add_string(keys::general::DESCRIPTION, description)
    }

    pub fn add_quantization_version(&mut self, version: u32) -> Result<()> {
        self.add_u32(keys::general::QUANTIZATION_VERSION, version)
    }

    /// `general.file_type`, the llama.cpp `LLAMA_FTYPE_*` code.
    pub fn add_file_type(&mut self, ftype: u32) -> Result<()> {
        self.add_u32(keys::general::FILE_TYPE, ftype)
    }

    pub fn add_adapter_type(&mut self, adapter_type: &str) -> Result<()> {
        self.add_string(keys::adapter::TYPE, adapter_type)
    }

    pub fn add_lora_alpha(&mut self, alpha: f32) -> Result<()> {
        self.add_f32(keys::adapter::LORA_ALPHA, alpha)
    }

    /// Record a custom alignment; must be a non-zero power of two.
    pub fn add_alignment(&mut self, alignment: u32) -> Result<()> {
        self.add_u32(keys::general::ALIGNMENT, alignment)
    }

    // -----------------------------------------------------------------------
    // Tensors
    // -----------------------------------------------------------------------

    /// Declare a tensor. `shape` is row-major; `byte_size` must equal the
    /// size implied by shape and type.
    pub fn add_tensor_info(
        &mut self,
        name: impl Into<String>,
        shape: &[u64],
        tensor_type: GgufTensorType,
        byte_size: u64,
    ) -> Result<()> {
        self.check_mutable("add a tensor")?;
        self.tensors.add(name, shape, tensor_type, byte_size)
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Emit header, metadata and tensor tables followed by padding up to the
    /// data section.
    pub fn write_header_and_tables(&mut self) -> Result<()> {
        self.check_usable("write header and tables")?;
        if self.tables_written {
            return Err(GgufError::illegal_state("write header and tables", "they are already written"));
        }
        self.lock()?;

        let alignment = self.alignment();
        let start = self.sink.position();
        let result = emit_tables(&mut self.sink, self.byte_order, &self.metadata, &self.tensors, alignment);
        if let Err(e) = result {
            return Err(self.poison(e));
        }
        self.data_start = self.sink.position() - start;
        self.tables_written = true;
        debug!(
            "Wrote GGUF tables: {} metadata entries, {} tensors, data at {}",
            self.metadata.len(),
            self.tensors.len(),
            self.data_start
        );
        if self.tensors.is_empty() {
            self.finish()?;
        }
        Ok(())
    }

    /// Stream the payload of the next declared tensor, followed by padding.
    pub fn write_tensor_payload(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_usable("write a tensor payload")?;
        if !self.tables_written {
            return Err(GgufError::illegal_state(
                "write a tensor payload",
                "header and tables have not been written",
            ));
        }

        let declared = self.tensors.len() as u64;
        let Some(info) = self.tensors.get_index(self.next_tensor) else {
            let err = GgufError::PayloadCount { expected: declared, actual: declared + 1, detail: "attempted" };
            return Err(self.poison(err));
        };
        if bytes.len() as u64 != info.size {
            let err = GgufError::PayloadSizeMismatch {
                name: info.name.clone(),
                expected: info.size,
                actual: bytes.len() as u64,
            };
            return Err(self.poison(err));
        }

        let alignment = self.alignment();
        let result = self
            .sink
            .write_all(bytes)
            .map_err(GgufError::from)
            .and_then(|()| pad_to_alignment(&mut self.sink, alignment).map(drop));
        if let Err(e) = result {
            return Err(self.poison(e));
        }

        self.next_tensor += 1;
        if self.next_tensor == self.tensors.len() {
            self.finish()?;
        }
        Ok(())
    }

    /// Exact length of the complete output. Locks the tables.
    pub fn estimated_size(&mut self) -> Result<u64> {
        self.check_usable("estimate the output size")?;
        self.lock()?;
        let mut counter = CountingSink::new();
        emit_tables(&mut counter, self.byte_order, &self.metadata, &self.tensors, self.alignment())?;
        Ok(counter.position() + self.tensors.data_section_len())
    }

    /// Finish the session. Fails if the tables were written but payloads are
    /// missing. Calling again after a successful close is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.check_not_poisoned("close")?;
        if self.closed {
            return Ok(());
        }
        if self.tables_written && self.next_tensor < self.tensors.len() {
            let err = GgufError::PayloadCount {
                expected: self.tensors.len() as u64,
                actual: self.next_tensor as u64,
                detail: "written",
            };
            return Err(self.poison(err));
        }
        if !self.tables_written {
            warn!("Closing GGUF writer before header and tables were written; output is empty");
        }
        self.sink.flush()?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn finish(&mut self) -> Result<()> {
        self.state = WriterState::Written;
        if let Err(e) = self.sink.flush() {
            return Err(self.poison(e.into()));
        }
        debug!("GGUF write complete: {} bytes", self.sink.position());
        Ok(())
    }

    fn lock(&mut self) -> Result<()> {
        if self.state == WriterState::Building {
            self.tensors.finalize(self.alignment())?;
            self.state = WriterState::Finalized;
        }
        Ok(())
    }

    fn poison(&mut self, err: GgufError) -> GgufError {
        warn!("GGUF writer poisoned: {err}");
        self.poisoned = true;
        err
    }

    fn check_not_poisoned(&self, operation: &'static str) -> Result<()> {
        if self.poisoned {
            return Err(GgufError::illegal_state(operation, "the writer is poisoned by an earlier sequencing error"));
        }
        Ok(())
    }

    fn check_usable(&self, operation: &'static str) -> Result<()> {
        self.check_not_poisoned(operation)?;
        if self.closed {
            return Err(GgufError::illegal_state(operation, "the writer is closed"));
        }
        Ok(())
    }

    fn check_mutable(&self, operation: &'static str) -> Result<()> {
        self.check_usable(operation)?;
        if self.state != WriterState::Building {
            return Err(GgufError::illegal_state(operation, format!("the writer is {}", self.state)));
        }
        Ok(())
    }
}

impl<W: Write> GgufWriter<IoSink<W>> {
    /// Write to `inner`, recording `general.architecture = arch`. With
    /// `options.dry_run` nothing reaches `inner`.
    pub fn new(inner: W, arch: &str, options: &WriterOptions) -> Result<Self> {
        let sink = if options.dry_run { IoSink::discarding(inner) } else { IoSink::new(inner) };
        let mut writer = Self::with_sink(sink, options)?;
        writer.add_architecture(arch)?;
        Ok(writer)
    }

    /// Close the session and hand back the destination.
    pub fn into_inner(mut self) -> Result<W> {
        self.close()?;
        Ok(self.sink.into_inner())
    }
}

impl GgufWriter<CountingSink> {
    /// A session that only counts bytes.
    pub fn dry_run(arch: &str, options: &WriterOptions) -> Result<Self> {
        let mut writer = Self::with_sink(CountingSink::new(), options)?;
        writer.add_architecture(arch)?;
        Ok(writer)
    }
}

impl GgufWriter<Box<dyn Sink>> {
    /// Create (or truncate) `path`. With `options.dry_run` nothing is created.
    pub fn create(path: impl AsRef<Path>, arch: &str, options: &WriterOptions) -> Result<Self> {
        let sink: Box<dyn Sink> = if options.dry_run {
            Box::new(CountingSink::new())
        } else {
            Box::new(IoSink::new(BufWriter::new(File::create(path.as_ref())?)))
        };
        let mut writer = Self::with_sink(sink, options)?;
        writer.add_architecture(arch)?;
        Ok(writer)
    }
}

impl<S: Sink> fmt::Debug for GgufWriter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GgufWriter")
            .field("state", &self.state)
            .field("byte_order", &self.byte_order)
            .field("metadata", &self.metadata.len())
            .field("tensors", &self.tensors.len())
            .field("next_tensor", &self.next_tensor)
            .field("dry_run", &self.sink.is_dry_run())
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish()
    }
}

fn emit_tables<S: Sink + ?Sized>(
    sink: &mut S,
    order: ByteOrder,
    metadata: &MetadataTable,
    tensors: &TensorTable,
    alignment: u64,
) -> Result<()> {
    let header = GgufHeader::new(tensors.len() as u64, metadata.len() as u64, order);
    let mut enc = Encoder::new(&mut *sink, order);
    header.write_to(&mut enc)?;
    metadata.write_to(&mut enc)?;
    tensors.write_to(&mut enc)?;
    pad_to_alignment(sink, alignment)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_writer() -> GgufWriter<IoSink<Vec<u8>>> {
        let mut w = GgufWriter::new(Vec::new(), "llama", &WriterOptions::default()).unwrap();
        w.add_tensor_info("a", &[3], GgufTensorType::F32, 12).unwrap();
        w.add_tensor_info("b", &[2], GgufTensorType::F32, 8).unwrap();
        w
    }

    #[test]
    fn constructor_records_architecture() {
        let w = GgufWriter::new(Vec::new(), "llama", &WriterOptions::default()).unwrap();
        assert_eq!(w.metadata().get(keys::general::ARCHITECTURE).and_then(GgufValue::as_str), Some("llama"));
        assert_eq!(w.alignment(), 32);
        assert_eq!(w.state(), WriterState::Building);
    }

    #[test]
    fn configured_alignment_is_recorded_and_validated() {
        let opts = WriterOptions { alignment: Some(64), ..Default::default() };
        let w = GgufWriter::dry_run("llama", &opts).unwrap();
        assert_eq!(w.alignment(), 64);
        assert_eq!(w.metadata().get(keys::general::ALIGNMENT), Some(&GgufValue::Uint32(64)));

        let bad = WriterOptions { alignment: Some(3), ..Default::default() };
        assert!(matches!(GgufWriter::dry_run("llama", &bad), Err(GgufError::InvalidAlignment { .. })));
    }

    #[test]
    fn full_session_reaches_written() {
        let mut w = f32_writer();
        w.write_header_and_tables().unwrap();
        assert_eq!(w.state(), WriterState::Finalized);
        assert_eq!(w.data_offset() % 32, 0);
        w.write_tensor_payload(&[0; 12]).unwrap();
        w.write_tensor_payload(&[0; 8]).unwrap();
        assert_eq!(w.state(), WriterState::Written);
        let data_offset = w.data_offset();
        let bytes = w.into_inner().unwrap();
        assert_eq!(bytes.len() as u64, data_offset + 64);
    }

    #[test]
    fn mutation_after_lock_is_illegal_state() {
        let mut w = f32_writer();
        w.estimated_size().unwrap();
        assert!(matches!(w.add_u32("late", 1), Err(GgufError::IllegalState { .. })));
        assert!(matches!(
            w.add_tensor_info("c", &[1], GgufTensorType::F32, 4),
            Err(GgufError::IllegalState { .. })
        ));
        // Not a sequencing error: the session continues.
        w.write_header_and_tables().unwrap();
    }

    #[test]
    fn payload_before_tables_is_rejected() {
        let mut w = f32_writer();
        assert!(matches!(w.write_tensor_payload(&[0; 12]), Err(GgufError::IllegalState { .. })));
        w.write_header_and_tables().unwrap();
        w.write_tensor_payload(&[0; 12]).unwrap();
    }

    #[test]
    fn invariant_errors_do_not_poison() {
        let mut w = f32_writer();
        assert!(matches!(w.add_u8(keys::general::ARCHITECTURE, 1), Err(GgufError::DuplicateKey { .. })));
        assert!(matches!(
            w.add_tensor_info("a", &[3], GgufTensorType::F32, 12),
            Err(GgufError::DuplicateTensor { .. })
        ));
        w.add_u8("ok", 1).unwrap();
    }

    #[test]
    fn estimated_size_matches_output_with_empty_tensor_list() {
        let mut w = GgufWriter::new(Vec::new(), "llama", &WriterOptions::default()).unwrap();
        let estimate = w.estimated_size().unwrap();
        w.write_header_and_tables().unwrap();
        assert_eq!(w.state(), WriterState::Written);
        assert_eq!(w.into_inner().unwrap().len() as u64, estimate);
    }

    #[test]
    fn close_is_idempotent() {
        let mut w = GgufWriter::dry_run("llama", &WriterOptions::default()).unwrap();
        w.close().unwrap();
        w.close().unwrap();
        assert!(w.is_closed());
        assert!(matches!(w.write_header_and_tables(), Err(GgufError::IllegalState { .. })));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: WriterOptions = serde_json::from_str(r#"{"byte_order":"big"}"#).unwrap();
        assert_eq!(opts.byte_order, ByteOrder::Big);
        assert!(!opts.dry_run);
        assert_eq!(opts.alignment, None);
    }
}
