//! Error type shared by every GGUF operation.

use std::io;
use thiserror::Error;

use crate::types::GgufValueType;

/// Broad class of a [`GgufError`], used by callers to pick a recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The file is not a readable container (bad magic, version, tags, layout).
    /// Fatal for that file.
    Structural,
    /// A builder call broke a table invariant. The session stays usable and the
    /// call may be retried with corrected input.
    Invariant,
    /// Payloads were streamed out of sequence. The write session is unusable.
    Sequence,
    /// The source ended before the declared data did.
    Truncated,
    /// The instance is in a state that does not permit the operation.
    State,
    /// Underlying I/O or serialization failure.
    Io,
}

/// Errors returned while building, writing or reading a GGUF container.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GgufError {
    #[error("invalid magic {found:02x?} at byte offset 0, expected \"GGUF\"")]
    InvalidMagic { found: Vec<u8> },

    #[error("unsupported GGUF version {version} (supported: 2..=3)")]
    UnsupportedVersion { version: u32 },

    #[error("invalid alignment {alignment}: must be a non-zero power of two")]
    InvalidAlignment { alignment: u64 },

    #[error("unknown metadata value type tag {tag} at byte offset {offset}")]
    UnknownValueType { tag: u32, offset: u64 },

    #[error("unknown tensor type tag {tag} for tensor '{name}' at byte offset {offset}")]
    UnknownTensorType { tag: u32, name: String, offset: u64 },

    #[error("invalid UTF-8 in string at byte offset {offset}")]
    InvalidUtf8 { offset: u64 },

    #[error("malformed descriptor for tensor '{name}': {reason}")]
    MalformedTensor { name: String, reason: String },

    #[error("invalid value for metadata key '{key}': {reason}")]
    InvalidMetadata { key: String, reason: String },

    #[error(
        "truncated data at byte offset {offset}: needed {needed} bytes, {available} available"
    )]
    Truncated { offset: u64, needed: u64, available: u64 },

    #[error("duplicate metadata key '{key}'")]
    DuplicateKey { key: String },

    #[error("duplicate tensor name '{name}'")]
    DuplicateTensor { name: String },

    #[error("invalid shape {shape:?} for tensor '{name}': {reason}")]
    InvalidShape { name: String, shape: Vec<u64>, reason: &'static str },

    #[error("tensor '{name}' declares {actual} bytes but its shape and type imply {expected}")]
    TensorSizeMismatch { name: String, expected: u64, actual: u64 },

    #[error("array element {index} has type {found:?}, array declares {expected:?}")]
    ArrayTypeMismatch { expected: GgufValueType, found: GgufValueType, index: usize },

    #[error("payload for tensor '{name}' is {actual} bytes, expected {expected}")]
    PayloadSizeMismatch { name: String, expected: u64, actual: u64 },

    #[error("payload sequence broken: {expected} tensors declared, {actual} payloads {detail}")]
    PayloadCount { expected: u64, actual: u64, detail: &'static str },

    #[error("cannot {operation} while {state}")]
    IllegalState { operation: &'static str, state: String },

    #[error("tensor '{name}' not found")]
    TensorNotFound { name: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GgufError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMagic { .. }
            | Self::UnsupportedVersion { .. }
            | Self::InvalidAlignment { .. }
            | Self::UnknownValueType { .. }
            | Self::UnknownTensorType { .. }
            | Self::InvalidUtf8 { .. }
            | Self::MalformedTensor { .. }
            | Self::InvalidMetadata { .. } => ErrorKind::Structural,
            Self::Truncated { .. } => ErrorKind::Truncated,
            Self::DuplicateKey { .. }
            | Self::DuplicateTensor { .. }
            | Self::InvalidShape { .. }
            | Self::TensorSizeMismatch { .. }
            | Self::ArrayTypeMismatch { .. } => ErrorKind::Invariant,
            Self::PayloadSizeMismatch { .. } | Self::PayloadCount { .. } => ErrorKind::Sequence,
            Self::IllegalState { .. } | Self::TensorNotFound { .. } => ErrorKind::State,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn illegal_state(operation: &'static str, state: impl Into<String>) -> Self {
        Self::IllegalState { operation, state: state.into() }
    }
}

pub type Result<T> = std::result::Result<T, GgufError>;
