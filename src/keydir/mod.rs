//! KeyDir Module
//!
//! In-memory index from every live key to its latest on-disk location.
//!
//! ## Responsibilities
//! - O(1) lookup of a key's file, value offset and size
//! - Many concurrent readers, one writer per map mutation
//! - Conditional relocation of entries during merge
//!
//! ## Data Structure Choice
//! `HashMap` behind a parking_lot `RwLock`:
//! - Equal keys collapse to one entry (last write wins by construction)
//! - No ordering (range scans are not supported)
//! - The lock is held only for the map operation itself, never across I/O

mod table;

pub use table::KeyDir;

/// Location of the latest value for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDirEntry {
    /// Data file holding the value
    pub file_id: u32,

    /// Offset of the value bytes within that file
    pub value_pos: u64,

    /// Length of the value in bytes
    pub value_size: u32,

    /// Write timestamp (used by merge, never by lookups)
    pub timestamp: u64,
}
