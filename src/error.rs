//! Error types shared by the pipeline, containers and row stores.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, XError>;

/// Coarse classification of every [`XError`].
///
/// Callers that only care about the failure class (retry, create, report)
/// match on this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input was not a byte sequence, or a parameter was malformed.
    Input,
    /// A store, container or key does not exist.
    NotFound,
    /// The symbol map reached its configured maximum size.
    Capacity,
    /// Backing file unreadable, unwritable or corrupted.
    Io,
}

#[derive(Debug, Error)]
pub enum XError {
    #[error("expected a byte sequence, got {found}")]
    InputKind { found: &'static str },

    #[error("invalid field descriptor widths {widths:?}: {reason}")]
    InvalidDescriptor { widths: [u16; 5], reason: &'static str },

    #[error("invalid store id {id:?}")]
    InvalidStoreId { id: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("symbol map is full ({limit} symbols)")]
    Capacity { limit: usize },

    #[error("corrupt data in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("field descriptor mismatch: file has {found:?}, context uses {expected:?}")]
    DescriptorMismatch { expected: [u16; 5], found: [u16; 5] },

    #[error("symbol table diverges from the shared map at code {code}")]
    SymbolDivergence { code: u32 },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl XError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            XError::InputKind { .. }
            | XError::InvalidDescriptor { .. }
            | XError::InvalidStoreId { .. } => ErrorKind::Input,
            XError::NotFound { .. } => ErrorKind::NotFound,
            XError::Capacity { .. } => ErrorKind::Capacity,
            XError::Corrupt { .. }
            | XError::DescriptorMismatch { .. }
            | XError::SymbolDivergence { .. }
            | XError::Serialization(_)
            | XError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        XError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        XError::NotFound { what: what.into() }
    }
}

impl From<bincode::Error> for XError {
    fn from(err: bincode::Error) -> Self {
        XError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for XError {
    fn from(err: serde_json::Error) -> Self {
        XError::Serialization(err.to_string())
    }
}

impl From<time::error::Format> for XError {
    fn from(err: time::error::Format) -> Self {
        XError::Serialization(err.to_string())
    }
}
