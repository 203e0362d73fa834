//! Error types for LatticeDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using LatticeError.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Errors that can occur in LatticeDB operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    // B+ tree errors
    #[error("duplicate key")]
    DuplicateKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("key size mismatch: expected {expected} bytes, got {actual}")]
    KeySizeMismatch { expected: usize, actual: usize },

    #[error("header page full, unable to register index")]
    HeaderPageFull,

    #[error("index corrupted: {0}")]
    Corrupted(String),
}
