//! Entry Codec Module
//!
//! Binary encoding of the two on-disk record types.
//!
//! ## Responsibilities
//! - Serialize/deserialize log entries (one per Set/Delete)
//! - CRC-32 checksums for corruption and torn-write detection
//! - Serialize/deserialize hint entries (one per live key, written by merge)
//!
//! All integers are **little-endian**, in both record types.
//!
//! ## Log Entry (data file `cask.<id>`)
//! ```text
//! ┌─────────┬───────────────┬──────────────┬────────────────┬─────┬───────┐
//! │ CRC (4) │ Timestamp (8) │ KeySize (4)  │ ValueSize (4)  │ Key │ Value │
//! └─────────┴───────────────┴──────────────┴────────────────┴─────┴───────┘
//!   CRC covers every byte after itself.
//!   ValueSize = 0xFFFFFFFF marks a tombstone; no value bytes follow.
//! ```
//!
//! ## Hint Entry (hint file `cask.<id>.hint`)
//! ```text
//! ┌───────────────┬─────────────┬───────────────┬───────────────┬─────┐
//! │ Timestamp (8) │ KeySize (4) │ ValueSize (4) │ ValuePos (8)  │ Key │
//! └───────────────┴─────────────┴───────────────┴───────────────┴─────┘
//!   No checksum: hints are regenerable from data files.
//! ```

mod entry;
mod hint;

pub use entry::{
    decode, encode, encode_tombstone, value_offset, EntryHeader, LogEntry, HEADER_SIZE,
};
pub use hint::{decode_hint, encode_hint, HintEntry, HintHeader, HINT_HEADER_SIZE};

/// Sentinel value size marking a tombstone (deleted key)
pub const TOMBSTONE_SENTINEL: u32 = u32::MAX;
