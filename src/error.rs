//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// Empty or oversized key, oversized value. Never retried automatically.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing key. Expected outcome of a lookup, not logged as an error.
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corrupted entry: {0}")]
    CorruptedEntry(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disk full: {0}")]
    DiskFull(String),

    /// `file_id` does not resolve to an open data file
    #[error("Data file {0} not found")]
    FileNotFound(u32),

    /// Fewer bytes were available than the index promised
    #[error("Short read in file {file_id} at {pos}: expected {expected} bytes, got {actual}")]
    ShortRead {
        file_id: u32,
        pos: u64,
        expected: usize,
        actual: usize,
    },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Directory is locked by live process {pid} ({})", .path.display())]
    LockConflict { pid: u32, path: PathBuf },

    #[error("Store is not open")]
    NotOpen,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskError {
    /// Classify a write failure: out-of-space becomes `DiskFull`, everything
    /// else stays an `Io` error.
    pub(crate) fn from_write_error(err: std::io::Error) -> Self {
        if crate::storage::platform::is_disk_full(&err) {
            CaskError::DiskFull(err.to_string())
        } else {
            CaskError::Io(err)
        }
    }
}
