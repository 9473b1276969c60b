//! Store Module
//!
//! The public Set/Get/Delete/Merge/Close contract. Coordinates the KeyDir,
//! the File Manager, recovery and merge.
//!
//! ## Lifecycle
//! ```text
//! Closed ──open()──▶ Opening ──recovery ok──▶ Open ──close()──▶ Closing ──▶ Closed
//!                       │
//!                       └── lock conflict / I/O error ──▶ (open returns Err)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::format;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::merge::{MergeResult, Merger};
use crate::recovery::{Loader, RecoveryResult};
use crate::storage::{DirLock, FileManager};

/// Attempts for a read whose file was retired by a concurrent merge
const READ_ATTEMPTS: usize = 3;

/// Lifecycle state of a store handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
}

impl StoreState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StoreState::Opening,
            2 => StoreState::Open,
            3 => StoreState::Closing,
            _ => StoreState::Closed,
        }
    }
}

/// Point-in-time numbers about an open store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Live keys in the KeyDir
    pub key_count: usize,

    /// Data files owned by the store (active included)
    pub file_count: usize,

    pub active_file_id: u32,

    /// Sum of all data file sizes
    pub total_bytes: u64,

    /// Rotations that failed after a write had already landed
    pub rotation_failures: u64,
}

/// State owned by whoever holds the write lock
struct WriterState {
    /// Last timestamp handed out; new ones are strictly greater
    last_timestamp: u64,
}

impl WriterState {
    fn next_timestamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        self.last_timestamp = now.max(self.last_timestamp.saturating_add(1));
        self.last_timestamp
    }
}

/// A log-structured key-value store over one directory
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (set/delete/rotation/merge plan and swap): serialized by
///   `writer`. Append, optional fsync, then KeyDir update, in that order, so
///   a reader never sees an index entry for bytes not yet written.
/// - **Reads** (get): no store-level lock. KeyDir lookup under its read
///   lock, then a positional read on a shared file handle.
/// - **Merge**: one at a time (`merging`); holds `writer` only while
///   planning and swapping, never while scanning or writing output.
pub struct Store {
    /// Store directory
    dir: PathBuf,

    /// Store configuration
    config: Config,

    /// Current `StoreState`
    state: AtomicU8,

    /// In-memory index
    keydir: KeyDir,

    /// Active and immutable data files
    files: FileManager,

    /// Directory lock, released on close
    lock: Mutex<Option<DirLock>>,

    /// Serializes write operations
    writer: Mutex<WriterState>,

    /// Serializes merges (and close against a running merge)
    merging: Mutex<()>,

    /// What recovery found when this store was opened
    recovery: RecoveryResult,

    /// Failed post-write rotations since open
    rotation_failures: AtomicU64,
}

impl Store {
    /// Open or create a store in `dir`
    ///
    /// On startup:
    /// 1. Validate config, create the directory if needed
    /// 2. Take the directory lock (reclaiming a stale one)
    /// 3. Rebuild the KeyDir from hint/data files
    /// 4. Reopen the newest file for appends, or seal it and start a new
    ///    one when it ends in unreadable bytes
    ///
    /// Any failure releases the lock again.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let state = AtomicU8::new(StoreState::Opening as u8);

        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let lock = DirLock::acquire(&dir)?;

        let keydir = KeyDir::new();
        let (ids, recovery) = Loader::new(&dir, &keydir).load()?;
        let files = FileManager::open(&dir, &ids)?;
        if recovery.damaged_tail {
            let sealed = files.active_file_id();
            let active = files.rotate()?;
            tracing::warn!(
                "Sealed damaged cask.{}, appending to cask.{}",
                sealed,
                active
            );
        }

        tracing::info!(
            "Opened store at {} ({} keys, {} files, active cask.{})",
            dir.display(),
            keydir.len(),
            files.file_count(),
            files.active_file_id()
        );

        state.store(StoreState::Open as u8, Ordering::SeqCst);

        Ok(Self {
            dir,
            config,
            state,
            keydir,
            files,
            lock: Mutex::new(Some(lock)),
            writer: Mutex::new(WriterState {
                last_timestamp: recovery.max_timestamp,
            }),
            merging: Mutex::new(()),
            recovery,
            rotation_failures: AtomicU64::new(0),
        })
    }

    /// Open with default config
    pub fn open_default(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir, Config::default())
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Set a key-value pair
    ///
    /// Steps:
    /// 1. Validate sizes
    /// 2. Acquire write lock
    /// 3. Append to the active file (fsync if `sync_on_write`)
    /// 4. Update the KeyDir
    /// 5. Rotate if the active file crossed `max_file_size`
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.validate_key(key)?;
        if value.len() > self.config.max_value_size {
            return Err(CaskError::InvalidArgument(format!(
                "value is {} bytes, limit is {}",
                value.len(),
                self.config.max_value_size
            )));
        }

        let mut writer = self.writer.lock();
        self.check_open()?;

        let timestamp = writer.next_timestamp();
        let bytes = format::encode(key, value, timestamp);
        let appended = self.files.append_active(&bytes)?;
        if self.config.sync_on_write {
            self.files.sync_active()?;
        }

        self.keydir.set(
            key.to_vec(),
            KeyDirEntry {
                file_id: appended.file_id,
                value_pos: appended.value_pos,
                value_size: value.len() as u32,
                timestamp,
            },
        );

        self.maybe_rotate(appended.file_size);
        Ok(())
    }

    /// Alias for [`Store::set`]
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set(key, value)
    }

    /// Delete a key
    ///
    /// Idempotent: an absent key succeeds without any I/O. Otherwise a
    /// tombstone is appended before the KeyDir entry is dropped.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_open()?;

        let mut writer = self.writer.lock();
        self.check_open()?;

        if !self.keydir.contains_key(key) {
            return Ok(());
        }

        let timestamp = writer.next_timestamp();
        let bytes = format::encode_tombstone(key, timestamp);
        let appended = self.files.append_active(&bytes)?;
        if self.config.sync_on_write {
            self.files.sync_active()?;
        }

        self.keydir.remove(key);

        self.maybe_rotate(appended.file_size);
        Ok(())
    }

    /// Rotation failure does not undo a write that already landed. It is
    /// counted in `stats().rotation_failures` and the next write retries it.
    fn maybe_rotate(&self, active_size: u64) {
        if active_size < self.config.max_file_size {
            return;
        }
        if let Err(e) = self.files.rotate() {
            let failures = self.rotation_failures.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::error!(
                "Rotation of active cask.{} ({} bytes) failed ({} so far): {}",
                self.files.active_file_id(),
                active_size,
                failures,
                e
            );
        }
    }

    /// Force the active file to stable storage
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        let _writer = self.writer.lock();
        self.files.sync_active()
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Get the value for a key
    ///
    /// Returns `KeyNotFound` for a missing key and `CorruptedEntry` when the
    /// stored record fails verification.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_open()?;

        let mut last_err = None;
        for _ in 0..READ_ATTEMPTS {
            let entry = self.keydir.get(key).ok_or(CaskError::KeyNotFound)?;
            match self.read_value(key, &entry) {
                // A merge retired the file after our lookup; the KeyDir
                // already points at the new location.
                Err(CaskError::FileNotFound(id)) => {
                    tracing::debug!("cask.{} retired during read, retrying", id);
                    last_err = Some(id);
                }
                other => return other,
            }
        }

        Err(CaskError::CorruptedEntry(format!(
            "index points at missing data file {}",
            last_err.unwrap_or_default()
        )))
    }

    /// Read and verify the whole record behind a KeyDir entry
    fn read_value(&self, key: &[u8], entry: &KeyDirEntry) -> Result<Vec<u8>> {
        let header_len = format::value_offset(key.len());
        let start = entry.value_pos.checked_sub(header_len).ok_or_else(|| {
            CaskError::CorruptedEntry(format!(
                "value_pos {} in file {} precedes its header",
                entry.value_pos, entry.file_id
            ))
        })?;
        let len = header_len as usize + entry.value_size as usize;

        let bytes = match self.files.read_at(entry.file_id, start, len) {
            Ok(bytes) => bytes,
            Err(e @ CaskError::ShortRead { .. }) => {
                return Err(CaskError::CorruptedEntry(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let decoded = format::decode(&bytes)?;
        if decoded.key != key {
            return Err(CaskError::CorruptedEntry(format!(
                "record at {} in file {} belongs to another key",
                start, entry.file_id
            )));
        }
        decoded.value.ok_or_else(|| {
            CaskError::CorruptedEntry(format!(
                "index points at a tombstone at {} in file {}",
                start, entry.file_id
            ))
        })
    }

    /// Whether `key` is live (KeyDir only, no I/O)
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        Ok(self.keydir.contains_key(key))
    }

    /// Snapshot of all live keys, in no particular order
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        self.check_open()?;
        Ok(self.keydir.keys())
    }

    /// Fold over every live key-value pair, in no particular order
    ///
    /// Keys deleted while the fold runs are skipped.
    pub fn fold<T, F>(&self, init: T, mut f: F) -> Result<T>
    where
        F: FnMut(T, &[u8], Vec<u8>) -> T,
    {
        let mut acc = init;
        for key in self.keys()? {
            match self.get(&key) {
                Ok(value) => acc = f(acc, &key, value),
                Err(CaskError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(acc)
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Compact all immutable data into fresh files with hints
    ///
    /// Set/Get/Delete keep running while the inputs are scanned and the
    /// output is written; they wait only for the brief plan and swap steps.
    pub fn merge(&self) -> Result<MergeResult> {
        self.check_open()?;
        let _merging = self.merging.lock();
        self.check_open()?;

        let merger = Merger::new(&self.config, &self.files, &self.keydir);

        let plan = {
            let _writer = self.writer.lock();
            match merger.plan()? {
                Some(plan) => plan,
                None => return Ok(MergeResult::default()),
            }
        };

        let compacted = merger.compact(&plan)?;

        let _writer = self.writer.lock();
        merger.swap(&plan, compacted)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush, release the directory lock and move to `Closed`
    ///
    /// Waits for a running merge and in-flight writes. Every later
    /// operation, a second `close()` included, fails with `NotOpen`.
    pub fn close(&self) -> Result<()> {
        self.state
            .compare_exchange(
                StoreState::Open as u8,
                StoreState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| CaskError::NotOpen)?;

        let _merging = self.merging.lock();
        let _writer = self.writer.lock();

        let synced = self.files.sync_active();
        let released = match self.lock.lock().take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        };

        self.state.store(StoreState::Closed as u8, Ordering::SeqCst);
        tracing::info!("Closed store at {}", self.dir.display());

        synced.and(released)
    }

    fn check_open(&self) -> Result<()> {
        if self.state() == StoreState::Open {
            Ok(())
        } else {
            Err(CaskError::NotOpen)
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::InvalidArgument("key must not be empty".into()));
        }
        if key.len() > self.config.max_key_size {
            return Err(CaskError::InvalidArgument(format!(
                "key is {} bytes, limit is {}",
                key.len(),
                self.config.max_key_size
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Get the store directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stats from the recovery pass at open time
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.recovery
    }

    pub fn active_file_id(&self) -> u32 {
        self.files.active_file_id()
    }

    /// Current numbers about the store
    pub fn stats(&self) -> Result<StoreStats> {
        self.check_open()?;
        Ok(StoreStats {
            key_count: self.keydir.len(),
            file_count: self.files.file_count(),
            active_file_id: self.files.active_file_id(),
            total_bytes: self.files.total_bytes()?,
            rotation_failures: self.rotation_failures.load(Ordering::Relaxed),
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.state() == StoreState::Open {
            if let Err(e) = self.close() {
                tracing::warn!("Error closing store at {} on drop: {}", self.dir.display(), e);
            }
        }
    }
}
