//! In-place metadata editing.
//!
//! Edits are applied to a copy of the metadata table and the container is
//! rewritten through [`GgufWriter`] into a sibling temporary file, which then
//! replaces the original. Tensor order, payloads and byte order are kept; the
//! layout is recomputed, so changing `general.alignment` is supported.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::error::{GgufError, Result};
use crate::metadata::MetadataTable;
use crate::reader::{GgufReader, ReaderOptions};
use crate::sink::{CountingSink, IoSink};
use crate::types::GgufValueType;
use crate::value::{GgufArray, GgufValue};
use crate::writer::{GgufWriter, WriterOptions};

/// One metadata change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EditOperation {
    /// Insert `key`, or replace its value if present.
    Set { key: String, value: GgufValue },
    Delete { key: String },
    /// Fails if `new_key` already exists.
    Rename { key: String, new_key: String },
}

impl EditOperation {
    pub fn set(key: impl Into<String>, value: impl Into<GgufValue>) -> Self {
        Self::Set { key: key.into(), value: value.into() }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn rename(key: impl Into<String>, new_key: impl Into<String>) -> Self {
        Self::Rename { key: key.into(), new_key: new_key.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditOptions {
    /// Report what would change without touching the file.
    pub dry_run: bool,
    /// Copy the original next to it before replacing it.
    pub backup: bool,
    pub backup_suffix: String,
    /// Overwrite an existing backup.
    pub force: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self { dry_run: false, backup: true, backup_suffix: ".backup".to_owned(), force: false }
    }
}

/// Outcome of [`MetadataEditor::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EditReport {
    pub changed: Vec<(String, GgufValue)>,
    pub deleted: Vec<String>,
    pub renamed: Vec<(String, String)>,
    /// Keys named by delete or rename operations that were not present.
    pub missing: Vec<String>,
    /// Size of the rewritten file, or the size it would have in a dry run.
    pub output_size: Option<u64>,
    pub backup_path: Option<PathBuf>,
    /// Whether the file on disk was replaced.
    pub written: bool,
}

impl EditReport {
    pub fn has_changes(&self) -> bool {
        !(self.changed.is_empty() && self.deleted.is_empty() && self.renamed.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct MetadataEditor {
    path: PathBuf,
    options: EditOptions,
}

impl MetadataEditor {
    pub fn new(path: impl Into<PathBuf>, options: EditOptions) -> Self {
        Self { path: path.into(), options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `operations` in order and rewrite the file if anything changed.
    pub fn apply(&self, operations: &[EditOperation]) -> Result<EditReport> {
        let mut reader = GgufReader::open_with(&self.path, &ReaderOptions::default())?;
        let mut metadata = reader.get_fields()?.clone();
        let mut report = EditReport::default();
        for op in operations {
            apply_operation(&mut metadata, op, &mut report)?;
        }

        if !report.has_changes() {
            info!("No metadata changes for {}", self.path.display());
            return Ok(report);
        }

        let options = WriterOptions {
            byte_order: reader.byte_order()?,
            dry_run: self.options.dry_run,
            alignment: None,
        };

        if self.options.dry_run {
            let mut writer = GgufWriter::with_sink(CountingSink::new(), &options)?;
            stage(&mut writer, &metadata, &reader)?;
            report.output_size = Some(writer.estimated_size()?);
            info!("Dry run - no changes written to {}", self.path.display());
            return Ok(report);
        }

        if self.options.backup {
            report.backup_path = Some(self.create_backup()?);
        }

        let tmp = temp_path(&self.path);
        let result = rewrite(&tmp, &options, &metadata, &mut reader);
        reader.close();
        match result {
            Ok(size) => {
                fs::rename(&tmp, &self.path)?;
                report.output_size = Some(size);
                report.written = true;
                info!("File updated: {}", self.path.display());
                Ok(report)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp) {
                    debug!("Could not remove {}: {rm}", tmp.display());
                }
                Err(e)
            }
        }
    }

    fn create_backup(&self) -> Result<PathBuf> {
        let mut name = self.path.clone().into_os_string();
        name.push(&self.options.backup_suffix);
        let backup = PathBuf::from(name);
        if backup.exists() && !self.options.force {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("backup file already exists: {}", backup.display()),
            )
            .into());
        }
        fs::copy(&self.path, &backup)?;
        info!("Created backup: {}", backup.display());
        Ok(backup)
    }
}

fn apply_operation(metadata: &mut MetadataTable, op: &EditOperation, report: &mut EditReport) -> Result<()> {
    match op {
        EditOperation::Set { key, value } => {
            match metadata.replace(key.clone(), value.clone())? {
                Some(old) => info!("Updated {key}: {old} -> {value}"),
                None => info!("Added {key}: {value}"),
            }
            report.changed.push((key.clone(), value.clone()));
        }
        EditOperation::Delete { key } => {
            if metadata.remove(key).is_some() {
                info!("Deleted: {key}");
                report.deleted.push(key.clone());
            } else {
                warn!("Key not found for deletion: {key}");
                report.missing.push(key.clone());
            }
        }
        EditOperation::Rename { key, new_key } => {
            if metadata.rename(key, new_key.clone())? {
                info!("Renamed {key} -> {new_key}");
                report.renamed.push((key.clone(), new_key.clone()));
            } else {
                warn!("Key not found for rename: {key}");
                report.missing.push(key.clone());
            }
        }
    }
    Ok(())
}

/// Declare every entry and tensor of the edited container on `writer`.
fn stage<S, R>(writer: &mut GgufWriter<S>, metadata: &MetadataTable, reader: &GgufReader<R>) -> Result<()>
where
    S: crate::sink::Sink,
    R: io::Read + io::Seek,
{
    for (key, value) in metadata {
        writer.add_value(key, value.clone())?;
    }
    for t in reader.get_tensors()? {
        writer.add_tensor_info(t.name.clone(), &t.shape, t.tensor_type, t.size)?;
    }
    Ok(())
}

fn rewrite<R: io::Read + io::Seek>(
    tmp: &Path,
    options: &WriterOptions,
    metadata: &MetadataTable,
    reader: &mut GgufReader<R>,
) -> Result<u64> {
    let file = File::create(tmp)?;
    let mut writer = GgufWriter::with_sink(IoSink::new(BufWriter::new(file)), options)?;
    stage(&mut writer, metadata, reader)?;
    writer.write_header_and_tables()?;
    let names: Vec<String> = reader.get_tensors()?.iter().map(|t| t.name.clone()).collect();
    for name in &names {
        writer.write_tensor_payload(&reader.tensor_data(name)?)?;
    }
    let size = writer.position();
    let file = writer.into_inner()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(size)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.edit-tmp"))
}

/// Load operations from a JSON file.
///
/// Two layouts are accepted: an array of tagged operations
/// (`[{"op": "delete", "key": "x"}]`), or an object with optional `set`,
/// `delete` and `rename` sections:
///
/// ```json
/// { "set": { "general.name": "tiny", "general.file_type": 1 },
///   "delete": ["general.url"],
///   "rename": { "general.author": "general.organization" } }
/// ```
///
/// In `set`, plain JSON values map to GGUF types by shape (string, bool,
/// INT32/INT64/UINT64 by range, FLOAT64, homogeneous arrays). An object is
/// read as an explicitly typed value such as `{"Uint32": 7}`. Sections are
/// applied as set, delete, rename; keys within a section in sorted order.
/// Any other root, section name or section shape is a JSON error.
pub fn load_operations(path: impl AsRef<Path>) -> Result<Vec<EditOperation>> {
    let text = fs::read_to_string(path.as_ref())?;
    parse_operations(&text)
}

pub fn parse_operations(text: &str) -> Result<Vec<EditOperation>> {
    let root: Json = serde_json::from_str(text)?;
    let sections = match root {
        Json::Array(items) => return Ok(serde_json::from_value(Json::Array(items))?),
        Json::Object(sections) => sections,
        other => return Err(bad_document(format!("expected an object or an array of operations, found {other}"))),
    };
    if let Some(unknown) = sections.keys().find(|k| !matches!(k.as_str(), "set" | "delete" | "rename")) {
        return Err(bad_document(format!("unknown section \"{unknown}\", expected set, delete or rename")));
    }

    let mut ops = Vec::new();
    if let Some(set) = sections.get("set") {
        let set = set.as_object().ok_or_else(|| bad_document("\"set\" must be an object"))?;
        for (key, value) in set {
            ops.push(EditOperation::Set { key: key.clone(), value: json_to_value(key, value)? });
        }
    }
    if let Some(delete) = sections.get("delete") {
        let delete = delete.as_array().ok_or_else(|| bad_document("\"delete\" must be an array of keys"))?;
        for key in delete {
            ops.push(EditOperation::delete(json_key("delete", key)?));
        }
    }
    if let Some(rename) = sections.get("rename") {
        let rename = rename.as_object().ok_or_else(|| bad_document("\"rename\" must be an object"))?;
        for (key, new_key) in rename {
            ops.push(EditOperation::rename(key.clone(), json_key("rename", new_key)?));
        }
    }
    Ok(ops)
}

fn bad_document(msg: impl std::fmt::Display) -> GgufError {
    GgufError::Json(serde::de::Error::custom(msg))
}

fn json_key(section: &str, v: &Json) -> Result<String> {
    v.as_str().map(str::to_owned).ok_or_else(|| bad_document(format!("\"{section}\" keys must be strings, found {v}")))
}

fn json_to_value(key: &str, v: &Json) -> Result<GgufValue> {
    let invalid = |reason: String| GgufError::InvalidMetadata { key: key.to_owned(), reason };
    Ok(match v {
        Json::String(s) => GgufValue::String(s.clone()),
        Json::Bool(b) => GgufValue::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => GgufValue::Int32(small),
                    Err(_) => GgufValue::Int64(i),
                }
            } else if let Some(u) = n.as_u64() {
                GgufValue::Uint64(u)
            } else {
                GgufValue::Float64(n.as_f64().ok_or_else(|| invalid(format!("unrepresentable number {n}")))?)
            }
        }
        Json::Array(items) => {
            let values = items.iter().map(|item| json_to_value(key, item)).collect::<Result<Vec<_>>>()?;
            let elem_type = values.first().map_or(GgufValueType::String, GgufValue::value_type);
            GgufValue::Array(GgufArray::new(elem_type, values)?)
        }
        Json::Object(_) => serde_json::from_value(v.clone())?,
        Json::Null => return Err(invalid("null is not a GGUF value".into())),
    })
}
