//! Fixed-width file header: magic, version and table counts.

use std::io::{Read, Seek, Write};

use tracing::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::constants::{GGUF_MAGIC, GGUF_VERSION, GGUF_VERSION_MIN};
use crate::error::{GgufError, Result};
use crate::types::ByteOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_count: u64,
    pub byte_order: ByteOrder,
}

impl GgufHeader {
    pub fn new(tensor_count: u64, metadata_count: u64, byte_order: ByteOrder) -> Self {
        Self { version: GGUF_VERSION, tensor_count, metadata_count, byte_order }
    }

    /// Write the header. The magic is emitted as literal bytes; every other
    /// field follows the encoder's byte order.
    pub fn write_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<()> {
        enc.put(&GGUF_MAGIC)?;
        enc.put_u32(self.version)?;
        enc.put_u64(self.tensor_count)?;
        enc.put_u64(self.metadata_count)
    }

    /// Read and validate a header, switching `dec` to the detected byte order.
    pub fn read_from<R: Read + Seek>(dec: &mut Decoder<R>) -> Result<Self> {
        check_magic(dec)?;

        let raw = u32::from_le_bytes(dec.read_raw4()?);
        // A little-endian reader sees a small big-endian version number in
        // the high half-word.
        let (byte_order, version) = if raw & 0xffff == 0 && raw >> 16 != 0 {
            (ByteOrder::Big, raw.swap_bytes())
        } else {
            (ByteOrder::Little, raw)
        };
        dec.set_byte_order(byte_order);

        match version {
            GGUF_VERSION => {}
            v if v >= GGUF_VERSION_MIN && v < GGUF_VERSION => {
                warn!(version = v, "reading legacy GGUF version on a best-effort basis");
            }
            v => return Err(GgufError::UnsupportedVersion { version: v }),
        }

        let tensor_count = dec.read_u64()?;
        let metadata_count = dec.read_u64()?;
        debug!(version, tensor_count, metadata_count, %byte_order, "parsed GGUF header");
        Ok(Self { version, tensor_count, metadata_count, byte_order })
    }
}

/// Inputs shorter than the magic are truncated only when what is there
/// agrees with it; anything else is a wrong magic.
fn check_magic<R: Read + Seek>(dec: &mut Decoder<R>) -> Result<()> {
    let start = dec.position();
    let available = dec.remaining();
    if available < GGUF_MAGIC.len() as u64 {
        let found = dec.read_bytes(available)?;
        if GGUF_MAGIC.starts_with(&found) {
            return Err(GgufError::Truncated { offset: start, needed: GGUF_MAGIC.len() as u64, available });
        }
        return Err(GgufError::InvalidMagic { found });
    }
    let found = dec.read_raw4()?;
    if found != GGUF_MAGIC {
        return Err(GgufError::InvalidMagic { found: found.to_vec() });
    }
    Ok(())
}
