//! File, content and metadata digests.
//!
//! `Sha256`, `Sha1` and `Md5` cover every byte of the file. `Content` covers
//! tensor descriptors and payloads in name order, so it is unaffected by
//! metadata edits or tensor reordering. `Metadata` covers keys, type names and
//! little-endian encoded values in key order, so it is unaffected by the file's
//! byte order and by tensor data. Names, keys and type names are framed with a
//! u64 length so distinct tables never feed the same bytes to the digest.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::time::Instant;

use md5::Md5;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::codec::encode_value;
use crate::error::Result;
use crate::metadata::MetadataTable;
use crate::reader::{GgufReader, LoadMode, ReaderOptions};
use crate::types::ByteOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha1,
    Md5,
    Content,
    Metadata,
}

impl HashAlgorithm {
    /// Digests that need the container parsed rather than its raw bytes.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Content | Self::Metadata)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
            Self::Content => "content",
            Self::Metadata => "metadata",
        })
    }
}

/// Digests of one file, hex encoded, in the order requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashReport {
    pub path: PathBuf,
    pub file_size: u64,
    pub elapsed_ms: u128,
    pub hashes: Vec<(HashAlgorithm, String)>,
    /// Set instead of `hashes` when the file could not be processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HashReport {
    pub fn get(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.hashes.iter().find(|(a, _)| *a == algorithm).map(|(_, h)| h.as_str())
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for HashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.error {
            return writeln!(f, "{}: ERROR - {err}", self.path.display());
        }
        writeln!(f, "{} ({} bytes, {}ms):", self.path.display(), self.file_size, self.elapsed_ms)?;
        for (algorithm, hash) in &self.hashes {
            writeln!(f, "  {algorithm:<10}: {hash}")?;
        }
        Ok(())
    }
}

/// Hash one file with each of `algorithms`.
pub fn hash_file(path: impl AsRef<Path>, algorithms: &[HashAlgorithm]) -> Result<HashReport> {
    let path = path.as_ref();
    let start = Instant::now();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    // Zero-length files cannot be mapped on every platform.
    // SAFETY: the mapping is read-only and dropped before returning. The
    // caller must not truncate the file while it is being hashed.
    let mmap = if file_size == 0 { None } else { Some(unsafe { Mmap::map(&file)? }) };
    let bytes: &[u8] = mmap.as_deref().unwrap_or(&[]);

    let needs_reader = algorithms.iter().any(|a| a.is_structural());
    let mut reader = if needs_reader {
        let options = ReaderOptions { load_mode: LoadMode::Lazy };
        Some(GgufReader::from_reader(Cursor::new(bytes), &options)?)
    } else {
        None
    };

    let mut hashes = Vec::with_capacity(algorithms.len());
    for &algorithm in algorithms {
        let digest = match (algorithm, reader.as_mut()) {
            (HashAlgorithm::Sha256, _) => Sha256::digest(bytes).to_vec(),
            (HashAlgorithm::Sha1, _) => Sha1::digest(bytes).to_vec(),
            (HashAlgorithm::Md5, _) => Md5::digest(bytes).to_vec(),
            (HashAlgorithm::Content, Some(r)) => content_digest(r)?,
            (HashAlgorithm::Metadata, Some(r)) => metadata_digest(r.get_fields()?)?,
            (HashAlgorithm::Content | HashAlgorithm::Metadata, None) => continue,
        };
        hashes.push((algorithm, hex(&digest)));
    }

    let elapsed_ms = start.elapsed().as_millis();
    debug!("Hashed {} in {} ms", path.display(), elapsed_ms);
    Ok(HashReport { path: path.to_owned(), file_size, elapsed_ms, hashes, error: None })
}

/// Hash several files. A failure is recorded in that file's report and does
/// not stop the rest.
pub fn hash_files<P: AsRef<Path>>(paths: &[P], algorithms: &[HashAlgorithm]) -> Vec<HashReport> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            hash_file(path, algorithms).unwrap_or_else(|e| {
                warn!("Failed to hash {}: {e}", path.display());
                HashReport {
                    path: path.to_owned(),
                    file_size: 0,
                    elapsed_ms: 0,
                    hashes: Vec::new(),
                    error: Some(e.to_string()),
                }
            })
        })
        .collect()
}

/// Hash every `*.gguf` file in `dir`, descending into subdirectories when
/// `recursive` is set. Files are visited in name order; per-file failures are
/// recorded as in [`hash_files`].
pub fn hash_directory(
    dir: impl AsRef<Path>,
    recursive: bool,
    algorithms: &[HashAlgorithm],
) -> Result<Vec<HashReport>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        let msg = format!("{} is not a directory", dir.display());
        return Err(io::Error::new(io::ErrorKind::NotADirectory, msg).into());
    }

    let walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    let walker = if recursive { walker } else { walker.max_depth(1) };
    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && has_gguf_extension(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    info!("Hashing {} GGUF files under {}", paths.len(), dir.display());
    Ok(hash_files(&paths, algorithms))
}

fn has_gguf_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("gguf"))
}

/// Outcome of checking a file against a known digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub path: PathBuf,
    pub algorithm: HashAlgorithm,
    pub expected: String,
    pub actual: String,
    pub matches: bool,
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.matches { "OK" } else { "MISMATCH" };
        write!(f, "{}: {} {verdict}", self.path.display(), self.algorithm)?;
        if !self.matches {
            write!(f, " (expected {}, got {})", self.expected, self.actual)?;
        }
        Ok(())
    }
}

/// Hash `path` with `algorithm` and compare against `expected`, ignoring
/// case and surrounding whitespace. A mismatch is a result, not an error.
pub fn verify(path: impl AsRef<Path>, algorithm: HashAlgorithm, expected: &str) -> Result<Verification> {
    let path = path.as_ref();
    let report = hash_file(path, &[algorithm])?;
    let actual = report.get(algorithm).unwrap_or_default().to_owned();
    let expected = expected.trim().to_owned();
    let matches = actual.eq_ignore_ascii_case(&expected);
    if !matches {
        warn!("{algorithm} mismatch for {}", path.display());
    }
    Ok(Verification { path: path.to_owned(), algorithm, expected, actual, matches })
}

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn content_digest(reader: &mut GgufReader<Cursor<&[u8]>>) -> Result<Vec<u8>> {
    let mut tensors = reader.get_tensors()?.to_vec();
    tensors.sort_by(|a, b| a.name.cmp(&b.name));
    let mut hasher = Sha256::new();
    for t in &tensors {
        update_framed(&mut hasher, t.name.as_bytes());
        hasher.update(t.size.to_le_bytes());
        update_framed(&mut hasher, t.tensor_type.name().as_bytes());
        hasher.update((t.shape.len() as u64).to_le_bytes());
        for d in &t.shape {
            hasher.update(d.to_le_bytes());
        }
        hasher.update(&reader.tensor_data(&t.name)?);
    }
    Ok(hasher.finalize().to_vec())
}

fn metadata_digest(metadata: &MetadataTable) -> Result<Vec<u8>> {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        update_framed(&mut hasher, key.as_bytes());
        update_framed(&mut hasher, value.value_type().name().as_bytes());
        hasher.update(encode_value(value, ByteOrder::Little)?);
    }
    Ok(hasher.finalize().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
