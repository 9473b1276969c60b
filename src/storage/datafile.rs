//! Data files
//!
//! Read handles, the append writer, and the sequential scanner used by
//! recovery and merge.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::format::{self, EntryHeader, LogEntry, HEADER_SIZE};

use super::platform;

// =============================================================================
// Read Handle
// =============================================================================

/// Read-only handle on a data file
///
/// Reads are positional, so one handle serves any number of concurrent
/// readers without locking.
#[derive(Debug)]
pub struct DataFile {
    id: u32,
    path: PathBuf,
    file: File,
}

impl DataFile {
    /// Open an existing data file for reading
    pub fn open(path: &Path, id: u32) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file on disk
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `size` bytes at `pos`
    ///
    /// Fewer available bytes is a `ShortRead`.
    pub fn read_at(&self, pos: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = platform::read_at_most(&self.file, &mut buf, pos)?;
        if n < size {
            return Err(CaskError::ShortRead {
                file_id: self.id,
                pos,
                expected: size,
                actual: n,
            });
        }
        Ok(buf)
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Append-only writer for a data file
///
/// Each append is a single unbuffered `write_all`, so bytes are visible to
/// read handles on the same file as soon as it returns.
#[derive(Debug)]
pub struct DataFileWriter {
    id: u32,
    path: PathBuf,
    file: File,
    size: u64,
}

impl DataFileWriter {
    /// Create a brand new data file; fails if one already exists
    pub fn create(path: &Path, id: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            size: 0,
        })
    }

    /// Reopen an existing data file for further appends
    pub fn open_append(path: &Path, id: u32) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append `bytes`, returning the offset they start at
    ///
    /// On failure the file is cut back to its previous length so a torn
    /// record never sits in front of later appends.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.size;

        if let Err(e) = self.file.write_all(bytes) {
            if let Err(trunc) = self.file.set_len(offset) {
                tracing::warn!(
                    "Failed to roll back partial write in {}: {}",
                    self.path.display(),
                    trunc
                );
            }
            return Err(CaskError::from_write_error(e));
        }

        self.size += bytes.len() as u64;
        Ok(offset)
    }

    /// Force written bytes to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(CaskError::from_write_error)
    }
}

// =============================================================================
// Sequential Scanner
// =============================================================================

/// An entry read by `DataFileScanner`, with its location
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub file_id: u32,
    /// Offset of the entry's first byte
    pub offset: u64,
    pub entry: LogEntry,
}

impl ScannedEntry {
    /// Offset of the value bytes
    pub fn value_pos(&self) -> u64 {
        self.offset + format::value_offset(self.entry.key.len())
    }

    pub fn entry_len(&self) -> u64 {
        self.entry.encoded_len() as u64
    }
}

/// Iterates the valid entries of a data file in offset order
///
/// - A record that fails verification (CRC mismatch, empty key, or a declared
///   length past end-of-file) is skipped: scanning resumes at the next offset
///   where a complete, CRC-valid record starts. Each skipped region counts
///   once in `corrupted()`.
/// - A complete record with a bad CRC and no valid record after it is
///   skipped by its own length.
/// - Otherwise, and on a partial header or I/O error, the scan ends (torn
///   tail); `torn_at()` reports where.
///
/// Nothing is ever cut from the file.
pub struct DataFileScanner {
    file_id: u32,
    path: PathBuf,
    reader: BufReader<File>,
    file_len: u64,
    offset: u64,
    corrupted: u64,
    skipped_bytes: u64,
    torn_at: Option<u64>,
}

impl DataFileScanner {
    /// Open a data file for scanning from offset 0
    pub fn open(path: &Path, file_id: u32) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            file_id,
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            file_len,
            offset: 0,
            corrupted: 0,
            skipped_bytes: 0,
            torn_at: None,
        })
    }

    /// Number of damaged regions skipped
    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }

    /// Bytes skipped inside the file (not counting a torn tail)
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Offset where scanning stopped early, if it did
    pub fn torn_at(&self) -> Option<u64> {
        self.torn_at
    }

    /// Bytes after `torn_at()` that were never read
    pub fn unread_tail(&self) -> u64 {
        self.torn_at.map_or(0, |at| self.file_len - at)
    }

    /// Length of the file when the scan started
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    fn stop(&mut self, reason: &str) {
        tracing::warn!(
            "Stopping scan of {} at offset {} ({} of {} bytes unread): {}",
            self.path.display(),
            self.offset,
            self.file_len - self.offset,
            self.file_len,
            reason
        );
        self.torn_at = Some(self.offset);
    }

    /// Skip the damaged record at `self.offset`. Returns false when the scan
    /// has to stop instead.
    ///
    /// `record_len` is the declared length of a record that was read in full.
    fn skip_damaged(&mut self, reason: &str, record_len: Option<u64>) -> bool {
        let start = self.offset;
        let next = match self.find_next_record(start + 1) {
            Ok(next) => next,
            Err(e) => {
                self.stop(&format!("{}; resync failed: {}", reason, e));
                return false;
            }
        };

        let Some(next) = next.or(record_len.map(|len| start + len)) else {
            self.stop(reason);
            return false;
        };

        if let Err(e) = self.reader.seek(SeekFrom::Start(next)) {
            self.stop(&format!("{}; seek failed: {}", reason, e));
            return false;
        }

        tracing::warn!(
            "Skipping {} damaged byte(s) in {} at offset {} ({}), resuming at {}",
            next - start,
            self.path.display(),
            start,
            reason,
            next
        );
        self.corrupted += 1;
        self.skipped_bytes += next - start;
        self.offset = next;
        true
    }

    /// First offset at or after `from` where a complete, valid record starts
    fn find_next_record(&mut self, from: u64) -> std::io::Result<Option<u64>> {
        if from >= self.file_len {
            return Ok(None);
        }

        self.reader.seek(SeekFrom::Start(from))?;
        let mut rest = Vec::with_capacity((self.file_len - from) as usize);
        self.reader
            .by_ref()
            .take(self.file_len - from)
            .read_to_end(&mut rest)?;

        let mut pos = 0;
        while rest.len() - pos >= HEADER_SIZE {
            let candidate = &rest[pos..];
            if let Ok(header) = EntryHeader::parse(candidate) {
                let len = header.entry_len();
                if header.key_size > 0
                    && len <= candidate.len() as u64
                    && format::decode(&candidate[..len as usize]).is_ok()
                {
                    return Ok(Some(from + pos as u64));
                }
            }
            pos += 1;
        }
        Ok(None)
    }
}

impl Iterator for DataFileScanner {
    type Item = ScannedEntry;

    fn next(&mut self) -> Option<ScannedEntry> {
        loop {
            if self.torn_at.is_some() || self.offset >= self.file_len {
                return None;
            }

            let remaining = self.file_len - self.offset;
            if remaining < HEADER_SIZE as u64 {
                self.stop("partial header");
                return None;
            }

            let mut header_buf = [0u8; HEADER_SIZE];
            if let Err(e) = self.reader.read_exact(&mut header_buf) {
                self.stop(&format!("read failed: {}", e));
                return None;
            }

            let header = match EntryHeader::parse(&header_buf) {
                Ok(h) => h,
                Err(e) => {
                    self.stop(&e.to_string());
                    return None;
                }
            };

            let entry_len = header.entry_len();
            if header.key_size == 0 {
                if self.skip_damaged("empty key in header", None) {
                    continue;
                }
                return None;
            }
            if entry_len > remaining {
                let reason = format!("entry declares {} bytes, {} remain", entry_len, remaining);
                if self.skip_damaged(&reason, None) {
                    continue;
                }
                return None;
            }

            let mut buf = vec![0u8; entry_len as usize];
            buf[..HEADER_SIZE].copy_from_slice(&header_buf);
            if let Err(e) = self.reader.read_exact(&mut buf[HEADER_SIZE..]) {
                self.stop(&format!("read failed: {}", e));
                return None;
            }

            match format::decode(&buf) {
                Ok(entry) => {
                    let offset = self.offset;
                    self.offset += entry_len;
                    return Some(ScannedEntry {
                        file_id: self.file_id,
                        offset,
                        entry,
                    });
                }
                Err(e) => {
                    // The length fields may be the damaged part, so resync
                    // rather than trusting entry_len
                    if !self.skip_damaged(&e.to_string(), Some(entry_len)) {
                        return None;
                    }
                }
            }
        }
    }
}
