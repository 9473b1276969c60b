//! Hint entry definitions
//!
//! A hint entry carries everything recovery needs to index a key without
//! reading its value.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

use super::TOMBSTONE_SENTINEL;

/// Header size: Timestamp (8) + KeySize (4) + ValueSize (4) + ValuePos (8) = 24 bytes
pub const HINT_HEADER_SIZE: usize = 24;

/// A single record from a hint file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintEntry {
    pub timestamp: u64,
    pub key: Vec<u8>,
    pub value_size: u32,
    /// Offset of the value bytes within the paired data file
    pub value_pos: u64,
}

impl HintEntry {
    pub fn is_tombstone(&self) -> bool {
        self.value_size == TOMBSTONE_SENTINEL
    }

    pub fn encoded_len(&self) -> usize {
        HINT_HEADER_SIZE + self.key.len()
    }
}

/// Fixed-size prefix of a hint entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintHeader {
    pub timestamp: u64,
    pub key_size: u32,
    pub value_size: u32,
    pub value_pos: u64,
}

impl HintHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HINT_HEADER_SIZE {
            return Err(CaskError::CorruptedEntry(format!(
                "short hint header: {} of {} bytes",
                buf.len(),
                HINT_HEADER_SIZE
            )));
        }

        let mut cur = &buf[..HINT_HEADER_SIZE];
        Ok(Self {
            timestamp: cur.get_u64_le(),
            key_size: cur.get_u32_le(),
            value_size: cur.get_u32_le(),
            value_pos: cur.get_u64_le(),
        })
    }
}

/// Encode a hint entry
pub fn encode_hint(key: &[u8], value_size: u32, value_pos: u64, timestamp: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(HINT_HEADER_SIZE + key.len());

    buf.put_u64_le(timestamp);
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(value_size);
    buf.put_u64_le(value_pos);
    buf.put_slice(key);

    buf.freeze()
}

/// Decode exactly one hint entry from `buf`
pub fn decode_hint(buf: &[u8]) -> Result<HintEntry> {
    let header = HintHeader::parse(buf)?;
    let expected = HINT_HEADER_SIZE + header.key_size as usize;

    if buf.len() != expected {
        return Err(CaskError::CorruptedEntry(format!(
            "hint length mismatch: {} bytes, header declares {}",
            buf.len(),
            expected
        )));
    }

    Ok(HintEntry {
        timestamp: header.timestamp,
        key: buf[HINT_HEADER_SIZE..].to_vec(),
        value_size: header.value_size,
        value_pos: header.value_pos,
    })
}
