//! File Manager
//!
//! Owns the active data file and read handles for every data file.
//!
//! ## Responsibilities
//! - Append encoded entries to the active file
//! - Resolve `file_id` → handle for positional reads
//! - Rotate the active file once it crosses the size threshold
//! - Register/retire files swapped in and out by merge

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{CaskError, Result};
use crate::format;

use super::datafile::{DataFile, DataFileWriter};
use super::naming;
use super::platform;

/// Where an appended entry landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub file_id: u32,
    /// Offset of the entry's first byte
    pub offset: u64,
    /// Offset of the value bytes (what the KeyDir records)
    pub value_pos: u64,
    /// Active file size after the append
    pub file_size: u64,
}

/// Manages the data files of one store directory
///
/// ## Concurrency:
/// - `active`: Mutex (appends and rotation are serialized)
/// - `files`: RwLock (readers clone an `Arc` handle and release the lock
///   before doing any I/O)
/// - A new file's read handle is published in `files` before it becomes the
///   append target, so no reader is ever handed an unresolvable `file_id`.
pub struct FileManager {
    /// Store directory
    dir: PathBuf,

    /// Writer for the active file
    active: Mutex<DataFileWriter>,

    /// Read handles for all files (immutable and active), keyed by id
    files: RwLock<BTreeMap<u32, Arc<DataFile>>>,
}

impl FileManager {
    /// Open the manager over the data files `ids` (ascending) found in `dir`
    ///
    /// The highest id becomes the active file; with no files, `cask.0` is
    /// created.
    pub fn open(dir: &Path, ids: &[u32]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for &id in ids {
            let handle = DataFile::open(&naming::data_path(dir, id), id)?;
            files.insert(id, Arc::new(handle));
        }

        let active = match ids.last() {
            Some(&id) => DataFileWriter::open_append(&naming::data_path(dir, id), id)?,
            None => {
                let path = naming::data_path(dir, 0);
                let writer = DataFileWriter::create(&path, 0)?;
                files.insert(0, Arc::new(DataFile::open(&path, 0)?));
                platform::sync_dir(dir)?;
                writer
            }
        };

        tracing::debug!(
            "FileManager opened {} file(s), active cask.{} ({} bytes)",
            files.len(),
            active.id(),
            active.size()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            active: Mutex::new(active),
            files: RwLock::new(files),
        })
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append an encoded entry to the active file
    pub fn append_active(&self, entry: &[u8]) -> Result<Appended> {
        let header = format::EntryHeader::parse(entry)?;
        let mut active = self.active.lock();

        let offset = active.append(entry)?;

        Ok(Appended {
            file_id: active.id(),
            offset,
            value_pos: offset + format::value_offset(header.key_size as usize),
            file_size: active.size(),
        })
    }

    /// fsync the active file
    pub fn sync_active(&self) -> Result<()> {
        self.active.lock().sync()
    }

    /// Seal the active file and start `cask.<active + 1>`
    pub fn rotate(&self) -> Result<u32> {
        let next = {
            let active = self.active.lock();
            active.id().checked_add(1).ok_or_else(id_space_exhausted)?
        };
        self.rotate_to(next)
    }

    /// Seal the active file and start a new one at `new_id`
    ///
    /// `new_id` must be above every existing id. Merge uses this to leave a
    /// gap of ids for its output.
    pub fn rotate_to(&self, new_id: u32) -> Result<u32> {
        let mut active = self.active.lock();
        if new_id <= active.id() {
            return Err(CaskError::InvalidArgument(format!(
                "rotation target {} is not above active file {}",
                new_id,
                active.id()
            )));
        }

        active.sync()?;

        let path = naming::data_path(&self.dir, new_id);
        let writer = DataFileWriter::create(&path, new_id)?;
        let handle = Arc::new(DataFile::open(&path, new_id)?);
        platform::sync_dir(&self.dir)?;

        // Publish the handle before switching appends over
        self.files.write().insert(new_id, handle);
        let sealed = std::mem::replace(&mut *active, writer);

        tracing::debug!(
            "Rotated cask.{} ({} bytes) → cask.{}",
            sealed.id(),
            sealed.size(),
            new_id
        );

        Ok(new_id)
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read exactly `size` bytes at `pos` in file `file_id`
    pub fn read_at(&self, file_id: u32, pos: u64, size: usize) -> Result<Vec<u8>> {
        self.handle(file_id)?.read_at(pos, size)
    }

    /// Shared handle on a data file
    pub fn handle(&self, file_id: u32) -> Result<Arc<DataFile>> {
        self.files
            .read()
            .get(&file_id)
            .cloned()
            .ok_or(CaskError::FileNotFound(file_id))
    }

    // =========================================================================
    // Merge Support
    // =========================================================================

    /// Open a read handle for a data file placed in the directory by merge
    pub fn register(&self, file_id: u32) -> Result<()> {
        let handle = DataFile::open(&naming::data_path(&self.dir, file_id), file_id)?;
        self.files.write().insert(file_id, Arc::new(handle));
        Ok(())
    }

    /// Drop the handle for `file_id` and delete its hint and data files
    ///
    /// Reads already holding the handle complete against it. The handle stays
    /// registered if the data file cannot be removed.
    pub fn retire(&self, file_id: u32) -> Result<()> {
        if file_id == self.active_file_id() {
            return Err(CaskError::InvalidArgument(format!(
                "cannot retire active file {}",
                file_id
            )));
        }

        remove_if_exists(&naming::hint_path(&self.dir, file_id))?;
        remove_if_exists(&naming::data_path(&self.dir, file_id))?;
        self.files.write().remove(&file_id);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_file_id(&self) -> u32 {
        self.active.lock().id()
    }

    pub fn active_file_size(&self) -> u64 {
        self.active.lock().size()
    }

    /// Ids of all files except the active one, ascending
    pub fn immutable_ids(&self) -> Vec<u32> {
        let active = self.active_file_id();
        self.files
            .read()
            .keys()
            .copied()
            .filter(|&id| id != active)
            .collect()
    }

    /// Ids of all files, ascending
    pub fn file_ids(&self) -> Vec<u32> {
        self.files.read().keys().copied().collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Whether `cask.<file_id>.hint` exists
    pub fn has_hint(&self, file_id: u32) -> bool {
        naming::hint_path(&self.dir, file_id).is_file()
    }

    /// Sum of all data file sizes
    pub fn total_bytes(&self) -> Result<u64> {
        let handles: Vec<Arc<DataFile>> = self.files.read().values().cloned().collect();
        let mut total = 0;
        for handle in handles {
            total += handle.len()?;
        }
        Ok(total)
    }
}

pub(crate) fn id_space_exhausted() -> CaskError {
    CaskError::Io(std::io::Error::new(
        ErrorKind::Other,
        "data file id space exhausted",
    ))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
