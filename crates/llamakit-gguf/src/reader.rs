//! GGUF reader.
//!
//! [`GgufReader::from_reader`] validates the header, decodes both tables and
//! checks that the source holds the whole padded data section before handing
//! back a queryable view. Payloads are either read up front
//! ([`LoadMode::Eager`]) or fetched with a seek and read per request
//! ([`LoadMode::Lazy`]); both modes return identical bytes.
//!
//! A reader owns its source and performs no internal locking. It is `Send`
//! when the source is, but lazy payload access takes `&mut self`, so sharing
//! one reader across threads requires external synchronization.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::Decoder;
use crate::constants::GGUF_DEFAULT_ALIGNMENT;
use crate::error::{GgufError, Result};
use crate::header::GgufHeader;
use crate::metadata::MetadataTable;
use crate::tensor::{TensorInfo, TensorTable, checked_align_up};
use crate::types::ByteOrder;
use crate::value::GgufValue;

/// When tensor payloads are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Seek and read on each [`GgufReader::tensor_data`] call.
    #[default]
    Lazy,
    /// Read every payload while opening and release the source.
    Eager,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    pub load_mode: LoadMode,
}

enum Payloads<R> {
    Eager(Vec<Vec<u8>>),
    Lazy(Decoder<R>),
}

struct Parsed<R> {
    header: GgufHeader,
    metadata: MetadataTable,
    tensors: TensorTable,
    alignment: u64,
    data_offset: u64,
    file_len: u64,
    payloads: Payloads<R>,
}

/// Parsed view of a GGUF container.
pub struct GgufReader<R> {
    parsed: Option<Parsed<R>>,
}

impl GgufReader<BufReader<File>> {
    /// Open a file lazily.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening GGUF file: {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), options)
    }
}

impl GgufReader<Cursor<Mmap>> {
    /// Open a file through a read-only memory map.
    pub fn open_mmap(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only and private to this reader. The
        // caller must not truncate the file while the reader is open.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_reader(Cursor::new(mmap), options)
    }
}

impl GgufReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>, options: &ReaderOptions) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes), options)
    }
}

impl<R: Read + Seek> GgufReader<R> {
    /// Parse a container from the current position of `source`. Padding is
    /// relative to that position, so a container embedded after a prefix
    /// reads the same as a standalone file; reported offsets stay absolute.
    pub fn from_reader(source: R, options: &ReaderOptions) -> Result<Self> {
        let mut dec = Decoder::new(source, ByteOrder::Little)?;
        let base = dec.position();
        let header = GgufHeader::read_from(&mut dec)?;
        let metadata = MetadataTable::read_from(&mut dec, header.metadata_count)?;

        let alignment = match metadata.alignment()? {
            Some(a) => {
                if a != GGUF_DEFAULT_ALIGNMENT {
                    debug!("Using custom alignment {a}");
                }
                u64::from(a)
            }
            None => u64::from(GGUF_DEFAULT_ALIGNMENT),
        };

        let tensors = TensorTable::read_from(&mut dec, header.tensor_count, alignment)?;
        let tables_end = dec.position();
        let data_offset = checked_align_up(tables_end - base, alignment)
            .and_then(|relative| relative.checked_add(base))
            .ok_or(GgufError::Truncated { offset: tables_end, needed: alignment, available: dec.remaining() })?;

        let data_len = tensors.data_section_len();
        let file_len = dec.len();
        if data_len > 0 {
            let available = file_len.saturating_sub(data_offset);
            if data_len > available {
                return Err(GgufError::Truncated { offset: data_offset, needed: data_len, available });
            }
        }

        let payloads = match options.load_mode {
            LoadMode::Lazy => Payloads::Lazy(dec),
            LoadMode::Eager => {
                let mut all = Vec::with_capacity(tensors.len());
                for info in &tensors {
                    let size = usize::try_from(info.size).map_err(|_| GgufError::MalformedTensor {
                        name: info.name.clone(),
                        reason: format!("{} bytes do not fit in memory", info.size),
                    })?;
                    let mut buf = vec![0u8; size];
                    dec.read_at(data_offset + info.offset, &mut buf)?;
                    all.push(buf);
                }
                Payloads::Eager(all)
            }
        };

        debug!(
            "Opened GGUF v{} ({}): {} tensors, {} metadata entries, data at {}",
            header.version,
            header.byte_order,
            tensors.len(),
            metadata.len(),
            data_offset
        );

        Ok(Self {
            parsed: Some(Parsed { header, metadata, tensors, alignment, data_offset, file_len, payloads }),
        })
    }

    fn parsed(&self, operation: &'static str) -> Result<&Parsed<R>> {
        self.parsed.as_ref().ok_or_else(|| GgufError::illegal_state(operation, "the reader is closed"))
    }

    pub fn is_open(&self) -> bool {
        self.parsed.is_some()
    }

    /// Release the source. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.parsed.take().is_some() {
            debug!("Closed GGUF reader");
        }
    }

    pub fn header(&self) -> Result<GgufHeader> {
        Ok(self.parsed("read the header")?.header)
    }

    pub fn version(&self) -> Result<u32> {
        Ok(self.parsed("read the version")?.header.version)
    }

    pub fn byte_order(&self) -> Result<ByteOrder> {
        Ok(self.parsed("read the byte order")?.header.byte_order)
    }

    pub fn alignment(&self) -> Result<u64> {
        Ok(self.parsed("read the alignment")?.alignment)
    }

    /// Absolute offset of the data section in the source.
    pub fn data_offset(&self) -> Result<u64> {
        Ok(self.parsed("read the data offset")?.data_offset)
    }

    /// Length of the source in bytes.
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.parsed("read the file length")?.file_len)
    }

    pub fn field_count(&self) -> Result<usize> {
        Ok(self.parsed("count metadata")?.metadata.len())
    }

    pub fn tensor_count(&self) -> Result<usize> {
        Ok(self.parsed("count tensors")?.tensors.len())
    }

    pub fn get_field(&self, key: &str) -> Result<Option<&GgufValue>> {
        Ok(self.parsed("read metadata")?.metadata.get(key))
    }

    /// All metadata in file order.
    pub fn get_fields(&self) -> Result<&MetadataTable> {
        Ok(&self.parsed("read metadata")?.metadata)
    }

    pub fn get_tensor(&self, name: &str) -> Result<Option<&TensorInfo>> {
        Ok(self.parsed("read tensor info")?.tensors.get(name))
    }

    /// All descriptors in file order.
    pub fn get_tensors(&self) -> Result<&[TensorInfo]> {
        Ok(self.parsed("read tensor info")?.tensors.as_slice())
    }

    /// Absolute file offset of a tensor's payload.
    pub fn tensor_file_offset(&self, name: &str) -> Result<u64> {
        let parsed = self.parsed("read tensor info")?;
        let info = parsed.tensors.get(name).ok_or_else(|| GgufError::TensorNotFound { name: name.to_owned() })?;
        Ok(parsed.data_offset + info.offset)
    }

    /// Payload bytes of `name`. Borrowed in eager mode, read from the
    /// source in lazy mode.
    pub fn tensor_data(&mut self, name: &str) -> Result<Cow<'_, [u8]>> {
        let parsed = self
            .parsed
            .as_mut()
            .ok_or_else(|| GgufError::illegal_state("read tensor data", "the reader is closed"))?;
        let index = parsed.tensors.position(name).ok_or_else(|| GgufError::TensorNotFound { name: name.to_owned() })?;
        match &mut parsed.payloads {
            Payloads::Eager(all) => Ok(Cow::Borrowed(all[index].as_slice())),
            Payloads::Lazy(dec) => {
                let Some(info) = parsed.tensors.get_index(index) else {
                    return Err(GgufError::TensorNotFound { name: name.to_owned() });
                };
                let size = usize::try_from(info.size).map_err(|_| GgufError::MalformedTensor {
                    name: info.name.clone(),
                    reason: format!("{} bytes do not fit in memory", info.size),
                })?;
                let mut buf = vec![0u8; size];
                dec.read_at(parsed.data_offset + info.offset, &mut buf)?;
                Ok(Cow::Owned(buf))
            }
        }
    }
}

impl<R> fmt::Debug for GgufReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parsed {
            None => f.write_str("GgufReader(closed)"),
            Some(p) => f
                .debug_struct("GgufReader")
                .field("version", &p.header.version)
                .field("byte_order", &p.header.byte_order)
                .field("metadata", &p.metadata.len())
                .field("tensors", &p.tensors.len())
                .field("data_offset", &p.data_offset)
                .field("eager", &matches!(p.payloads, Payloads::Eager(_)))
                .finish(),
        }
    }
}
