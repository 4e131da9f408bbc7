//! Human- and machine-readable summaries of a container.

use std::fmt;
use std::io::{Read, Seek};
use std::path::Path;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reader::{GgufReader, ReaderOptions};
use crate::types::{ByteOrder, GgufTensorType};
use crate::value::GgufValue;

/// What to include in an [`InspectionReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectOptions {
    pub show_metadata: bool,
    pub show_tensors: bool,
    /// Only list metadata keys starting with this prefix.
    pub key_filter: Option<String>,
    /// Strings longer than this are cut and suffixed with `...`.
    pub max_string_len: usize,
    /// Arrays longer than this are summarised.
    pub max_array_items: usize,
    /// Number of leading values to decode per tensor; 0 disables previews.
    pub preview_values: usize,
    /// Disable all truncation.
    pub verbose: bool,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            show_metadata: true,
            show_tensors: true,
            key_filter: None,
            max_string_len: 60,
            max_array_items: 3,
            preview_values: 0,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub path: Option<String>,
    pub file_size: u64,
    pub version: u32,
    pub byte_order: ByteOrder,
    pub host_byte_order: ByteOrder,
    pub alignment: u64,
    pub data_offset: u64,
    pub metadata_count: usize,
    pub tensor_count: usize,
    pub total_tensor_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataSummary {
    pub key: String,
    pub value_type: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorSummary {
    pub name: String,
    pub shape: Vec<u64>,
    pub tensor_type: GgufTensorType,
    pub n_elements: u64,
    pub size: u64,
    /// Absolute offset of the payload in the file.
    pub file_offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectionReport {
    pub file: FileSummary,
    pub metadata: Vec<MetadataSummary>,
    pub tensors: Vec<TensorSummary>,
}

impl InspectionReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Summarise an open reader.
pub fn inspect<R: Read + Seek>(reader: &mut GgufReader<R>, options: &InspectOptions) -> Result<InspectionReport> {
    let tensors = reader.get_tensors()?.to_vec();
    let file = FileSummary {
        path: None,
        file_size: reader.file_len()?,
        version: reader.version()?,
        byte_order: reader.byte_order()?,
        host_byte_order: ByteOrder::native(),
        alignment: reader.alignment()?,
        data_offset: reader.data_offset()?,
        metadata_count: reader.field_count()?,
        tensor_count: tensors.len(),
        total_tensor_bytes: tensors.iter().map(|t| t.size).sum(),
    };

    let mut metadata = Vec::new();
    if options.show_metadata {
        for (key, value) in reader.get_fields()? {
            if options.key_filter.as_deref().is_some_and(|prefix| !key.starts_with(prefix)) {
                continue;
            }
            metadata.push(MetadataSummary {
                key: key.to_owned(),
                value_type: value.value_type().name(),
                value: render_value(value, options),
            });
        }
    }

    let mut summaries = Vec::new();
    if options.show_tensors {
        let byte_order = file.byte_order;
        for t in tensors {
            let preview = if options.preview_values > 0 && supports_preview(t.tensor_type) {
                let data = reader.tensor_data(&t.name)?;
                decode_preview(&data, t.tensor_type, byte_order, options.preview_values)
            } else {
                None
            };
            summaries.push(TensorSummary {
                n_elements: t.n_elements(),
                file_offset: file.data_offset + t.offset,
                name: t.name,
                shape: t.shape,
                tensor_type: t.tensor_type,
                size: t.size,
                preview,
            });
        }
    }

    Ok(InspectionReport { file, metadata, tensors: summaries })
}

/// Open `path` and summarise it.
pub fn inspect_file(path: impl AsRef<Path>, options: &InspectOptions) -> Result<InspectionReport> {
    let path = path.as_ref();
    let mut reader = GgufReader::open_with(path, &ReaderOptions::default())?;
    let mut report = inspect(&mut reader, options)?;
    report.file.path = Some(path.display().to_string());
    Ok(report)
}

fn render_value(value: &GgufValue, options: &InspectOptions) -> String {
    match value {
        GgufValue::String(s) => {
            let max = options.max_string_len;
            if options.verbose || s.chars().count() <= max {
                format!("{s:?}")
            } else {
                let cut: String = s.chars().take(max).collect();
                format!("{cut:?}...")
            }
        }
        GgufValue::Array(a) => {
            let shown = if options.verbose { a.len() } else { a.len().min(options.max_array_items) };
            let items: Vec<String> = a.values()[..shown].iter().map(|v| render_value(v, options)).collect();
            if shown < a.len() {
                format!("[{} items: {}, ...]", a.len(), items.join(", "))
            } else {
                format!("[{}]", items.join(", "))
            }
        }
        other => other.to_string(),
    }
}

fn supports_preview(ty: GgufTensorType) -> bool {
    use GgufTensorType::*;
    matches!(ty, F32 | F16 | BF16 | F64 | I8 | I16 | I32 | I64)
}

/// Decode the first `n` elements of an unquantized payload as `f64`.
fn decode_preview(data: &[u8], ty: GgufTensorType, order: ByteOrder, n: usize) -> Option<Vec<f64>> {
    if !supports_preview(ty) {
        return None;
    }
    let width = usize::try_from(ty.type_size()).ok()?;
    let big = order == ByteOrder::Big;
    let values = data.chunks_exact(width).take(n).map(|chunk| {
        let mut b = [0u8; 8];
        b[..width].copy_from_slice(chunk);
        if big {
            b[..width].reverse();
        }
        // `b` now holds the element little-endian, zero-extended.
        match ty {
            GgufTensorType::F32 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            GgufTensorType::F16 => f16::from_le_bytes([b[0], b[1]]).to_f64(),
            GgufTensorType::BF16 => bf16::from_le_bytes([b[0], b[1]]).to_f64(),
            GgufTensorType::F64 => f64::from_le_bytes(b),
            GgufTensorType::I8 => f64::from(b[0] as i8),
            GgufTensorType::I16 => f64::from(i16::from_le_bytes([b[0], b[1]])),
            GgufTensorType::I32 => f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            _ => i64::from_le_bytes(b) as f64,
        }
    });
    Some(values.collect())
}

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = &self.file;
        writeln!(f, "=== FILE INFORMATION ===")?;
        if let Some(path) = &file.path {
            writeln!(f, "File: {path}")?;
        }
        writeln!(f, "Size: {} bytes ({:.2} MB)", file.file_size, file.file_size as f64 / (1024.0 * 1024.0))?;
        writeln!(f, "Version: {}", file.version)?;
        let mismatch = if file.byte_order == file.host_byte_order { "" } else { " (differs from host)" };
        writeln!(f, "Byte order: {} (host: {}){mismatch}", file.byte_order, file.host_byte_order)?;
        writeln!(f, "Alignment: {}", file.alignment)?;
        writeln!(f, "Data offset: 0x{:08X}", file.data_offset)?;
        writeln!(f, "Metadata entries: {}", file.metadata_count)?;
        writeln!(f, "Tensors: {} ({} bytes)", file.tensor_count, file.total_tensor_bytes)?;

        if !self.metadata.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== METADATA ===")?;
            let width = self.metadata.iter().map(|m| m.key.len()).max().unwrap_or(0);
            for m in &self.metadata {
                writeln!(f, "{:<width$}  {:<7}  {}", m.key, m.value_type, m.value)?;
            }
        }

        if !self.tensors.is_empty() {
            writeln!(f)?;
            writeln!(f, "=== TENSORS ===")?;
            let width = self.tensors.iter().map(|t| t.name.len()).max().unwrap_or(0);
            for t in &self.tensors {
                write!(
                    f,
                    "{:<width$}  {:<8}  {:<20}  {:>12} bytes  @ 0x{:08X}",
                    t.name,
                    t.tensor_type.name(),
                    format!("{:?}", t.shape),
                    t.size,
                    t.file_offset
                )?;
                if let Some(preview) = &t.preview {
                    write!(f, "  {preview:?}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::GgufArray;

    #[test]
    fn long_strings_are_cut() {
        let opts = InspectOptions { max_string_len: 3, ..Default::default() };
        assert_eq!(render_value(&GgufValue::from("abcdef"), &opts), "\"abc\"...");
        assert_eq!(render_value(&GgufValue::from("abc"), &opts), "\"abc\"");
        let verbose = InspectOptions { verbose: true, ..opts };
        assert_eq!(render_value(&GgufValue::from("abcdef"), &verbose), "\"abcdef\"");
    }

    #[test]
    fn long_arrays_are_summarised() {
        let opts = InspectOptions::default();
        let a = GgufValue::Array(GgufArray::from_scalars([1u32, 2, 3, 4, 5]));
        assert_eq!(render_value(&a, &opts), "[5 items: 1, 2, 3, ...]");
        let short = GgufValue::Array(GgufArray::from_scalars([true]));
        assert_eq!(render_value(&short, &opts), "[true]");
    }

    #[test]
    fn previews_decode_in_file_byte_order() {
        let le: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let be: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(decode_preview(&le, GgufTensorType::F32, ByteOrder::Little, 8), Some(vec![1.5, -2.0]));
        assert_eq!(decode_preview(&be, GgufTensorType::F32, ByteOrder::Big, 1), Some(vec![1.5]));

        let h = f16::from_f32(0.5).to_le_bytes();
        assert_eq!(decode_preview(&h, GgufTensorType::F16, ByteOrder::Little, 4), Some(vec![0.5]));
        assert_eq!(decode_preview(&[0xff], GgufTensorType::I8, ByteOrder::Little, 4), Some(vec![-1.0]));
        assert_eq!(decode_preview(&[0; 18], GgufTensorType::Q4_0, ByteOrder::Little, 4), None);
    }
}
