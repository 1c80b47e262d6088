//! Error types for patricia_db

use crate::model::Hash;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for patricia_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of an underlying key-value store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is closed: {}", .0.display())]
    Closed(PathBuf),

    #[error("Store is locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    #[error("Store does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid store file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Corrupt store log: {0}")]
    Corrupt(String),

    #[error("Record {what} of {len} bytes exceeds the 4 GiB limit")]
    TooLarge { what: &'static str, len: usize },
}

/// Errors that can occur in trie operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt node encoding: {0}")]
    CorruptEncoding(String),

    #[error("Missing node: {0}")]
    MissingNode(Hash),

    #[error("Invalid node shape: {0}")]
    InvalidNodeShape(String),

    #[error("Root not found: {0}")]
    RootNotFound(Hash),

    #[error("Missing value for key {0}")]
    MissingValue(String),

    #[error("Value does not match its reference for key {0}")]
    ValueMismatch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the failure came from storage I/O rather than tree contents
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(StoreError::Io(e))
    }
}
