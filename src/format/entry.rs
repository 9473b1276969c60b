//! Log entry definitions
//!
//! Defines the structure of individual data-file records and their codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

use super::TOMBSTONE_SENTINEL;

/// Header size: CRC (4) + Timestamp (8) + KeySize (4) + ValueSize (4) = 20 bytes
pub const HEADER_SIZE: usize = 20;

/// A single decoded record from a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Write time (unix micros), strictly increasing per store
    pub timestamp: u64,

    /// Raw key bytes
    pub key: Vec<u8>,

    /// `None` for a tombstone
    pub value: Option<Vec<u8>>,
}

impl LogEntry {
    /// Whether this entry marks a delete
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// The on-disk `value_size` field (sentinel for tombstones)
    pub fn value_size(&self) -> u32 {
        match &self.value {
            Some(v) => v.len() as u32,
            None => TOMBSTONE_SENTINEL,
        }
    }

    /// Total encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.as_ref().map_or(0, |v| v.len())
    }
}

/// Fixed-size prefix of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub crc: u32,
    pub timestamp: u64,
    pub key_size: u32,
    pub value_size: u32,
}

impl EntryHeader {
    /// Parse the first `HEADER_SIZE` bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CaskError::CorruptedEntry(format!(
                "short header: {} of {} bytes",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let mut cur = &buf[..HEADER_SIZE];
        Ok(Self {
            crc: cur.get_u32_le(),
            timestamp: cur.get_u64_le(),
            key_size: cur.get_u32_le(),
            value_size: cur.get_u32_le(),
        })
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_size == TOMBSTONE_SENTINEL
    }

    /// Number of value bytes that follow the key (0 for tombstones)
    pub fn value_len(&self) -> u64 {
        if self.is_tombstone() {
            0
        } else {
            self.value_size as u64
        }
    }

    /// Total length of the entry this header introduces
    pub fn entry_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_size as u64 + self.value_len()
    }
}

/// Offset of the value bytes relative to the start of an entry
pub fn value_offset(key_len: usize) -> u64 {
    (HEADER_SIZE + key_len) as u64
}

/// Encode a live entry
///
/// Callers validate sizes first: `key.len()` must fit in a u32 and
/// `value.len()` must be below the tombstone sentinel.
pub fn encode(key: &[u8], value: &[u8], timestamp: u64) -> Bytes {
    debug_assert!((value.len() as u64) < TOMBSTONE_SENTINEL as u64);
    encode_raw(key, value.len() as u32, value, timestamp)
}

/// Encode a tombstone for `key`
pub fn encode_tombstone(key: &[u8], timestamp: u64) -> Bytes {
    encode_raw(key, TOMBSTONE_SENTINEL, &[], timestamp)
}

fn encode_raw(key: &[u8], value_size: u32, value: &[u8], timestamp: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + key.len() + value.len());

    buf.put_u32_le(0); // CRC placeholder, filled below
    buf.put_u64_le(timestamp);
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(value_size);
    buf.put_slice(key);
    buf.put_slice(value);

    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());

    buf.freeze()
}

/// Decode exactly one entry from `buf`
///
/// `buf` must hold the whole entry and nothing else. A short buffer,
/// trailing bytes or a CRC mismatch yield `CorruptedEntry`.
pub fn decode(buf: &[u8]) -> Result<LogEntry> {
    let header = EntryHeader::parse(buf)?;
    let expected = header.entry_len();

    if (buf.len() as u64) < expected {
        return Err(CaskError::CorruptedEntry(format!(
            "short entry: {} of {} bytes",
            buf.len(),
            expected
        )));
    }
    if buf.len() as u64 > expected {
        return Err(CaskError::CorruptedEntry(format!(
            "{} trailing bytes after entry",
            buf.len() as u64 - expected
        )));
    }

    let actual = crc32fast::hash(&buf[4..]);
    if actual != header.crc {
        return Err(CaskError::CorruptedEntry(format!(
            "CRC mismatch: stored 0x{:08x}, computed 0x{:08x}",
            header.crc, actual
        )));
    }

    let body = &buf[HEADER_SIZE..];
    let key_len = header.key_size as usize;
    let key = body[..key_len].to_vec();
    let value = if header.is_tombstone() {
        None
    } else {
        Some(body[key_len..].to_vec())
    };

    Ok(LogEntry {
        timestamp: header.timestamp,
        key,
        value,
    })
}
