//! Hint files
//!
//! Written only by merge, one per compacted data file. A hint file is read
//! all-or-nothing: any malformed record rejects the whole file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::format::{self, HintEntry, HintHeader, HINT_HEADER_SIZE};

/// Buffered writer for a hint file
pub struct HintFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    entry_count: u64,
}

impl HintFileWriter {
    /// Create a new hint file (truncates any existing one)
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            entry_count: 0,
        })
    }

    /// Append one hint record
    pub fn add(&mut self, key: &[u8], value_size: u32, value_pos: u64, timestamp: u64) -> Result<()> {
        let bytes = format::encode_hint(key, value_size, value_pos, timestamp);
        self.writer
            .write_all(&bytes)
            .map_err(CaskError::from_write_error)?;
        self.entry_count += 1;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Flush and fsync
    pub fn finish(self) -> Result<()> {
        let file = self.writer.into_inner().map_err(|e| {
            CaskError::from_write_error(std::io::Error::new(
                e.error().kind(),
                format!("failed to flush {}: {}", self.path.display(), e.error()),
            ))
        })?;
        file.sync_all().map_err(CaskError::from_write_error)
    }
}

/// Read and parse every record in a hint file
///
/// Fails with `CorruptedEntry` on a truncated record, an empty key, or a
/// value range that does not fit inside a data file of `data_len` bytes.
pub fn read_hint_file(path: &Path, data_len: u64) -> Result<Vec<HintEntry>> {
    let data = fs::read(path)?;
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let header = HintHeader::parse(&data[pos..])?;
        let len = HINT_HEADER_SIZE + header.key_size as usize;
        if pos + len > data.len() {
            return Err(CaskError::CorruptedEntry(format!(
                "truncated hint record at offset {} in {}",
                pos,
                path.display()
            )));
        }

        let entry = format::decode_hint(&data[pos..pos + len])?;
        validate(&entry, data_len).map_err(|reason| {
            CaskError::CorruptedEntry(format!(
                "bad hint record at offset {} in {}: {}",
                pos,
                path.display(),
                reason
            ))
        })?;

        entries.push(entry);
        pos += len;
    }

    Ok(entries)
}

fn validate(entry: &HintEntry, data_len: u64) -> std::result::Result<(), String> {
    if entry.key.is_empty() {
        return Err("empty key".into());
    }
    if entry.is_tombstone() {
        return Ok(());
    }

    let value_start = format::value_offset(entry.key.len());
    if entry.value_pos < value_start {
        return Err(format!("value_pos {} precedes its header", entry.value_pos));
    }
    let end = entry
        .value_pos
        .checked_add(entry.value_size as u64)
        .ok_or_else(|| format!("value_pos {} overflows", entry.value_pos))?;
    if end > data_len {
        return Err(format!("value ends at {}, data file is {} bytes", end, data_len));
    }
    Ok(())
}
