//! Recovery
//!
//! Rebuilds the KeyDir from the files of a store directory at open time.
//!
//! ## Algorithm
//! 1. Remove a stray `merge.tmp/` and hint files with no data file
//! 2. Visit data files in ascending id order
//! 3. Prefer a file's hint when it parses and validates completely,
//!    otherwise replay the data file entry by entry
//! 4. Upsert unconditionally: later offsets and later files win, so no
//!    timestamp comparison is needed here
//! 5. Never modify a data file. A last file that ends in damage is reported
//!    through `damaged_tail` so the store seals it and appends elsewhere

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::storage::{naming, read_hint_file, DataFileScanner};

/// Result of a recovery pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Data files visited
    pub files_loaded: u64,

    /// Files indexed from their hint file instead of a full replay
    pub hint_files_used: u64,

    /// Live entries applied to the KeyDir (from data or hints)
    pub entries_loaded: u64,

    /// Tombstones replayed
    pub tombstones_seen: u64,

    /// Damaged regions skipped while replaying
    pub entries_corrupted: u64,

    /// Bytes replay could not use (skipped regions and torn tails)
    pub unreadable_bytes: u64,

    /// The last data file ends in bytes that are not a complete record
    pub damaged_tail: bool,

    /// Largest timestamp seen (seeds the store's timestamp clock)
    pub max_timestamp: u64,
}

/// Loads a store directory into a KeyDir
pub struct Loader<'a> {
    dir: &'a Path,
    keydir: &'a KeyDir,
}

impl<'a> Loader<'a> {
    pub fn new(dir: &'a Path, keydir: &'a KeyDir) -> Self {
        Self { dir, keydir }
    }

    /// Replay every data file, returning their ids (ascending) and stats
    pub fn load(&self) -> Result<(Vec<u32>, RecoveryResult)> {
        self.remove_stray_merge_dir()?;

        let ids = naming::list_data_files(self.dir)?;
        self.remove_orphan_hints(&ids)?;

        let mut result = RecoveryResult::default();

        for (idx, &id) in ids.iter().enumerate() {
            let is_last = idx + 1 == ids.len();

            if !self.load_from_hint(id, &mut result)? {
                self.replay_data_file(id, is_last, &mut result)?;
            }
            result.files_loaded += 1;
        }

        if result.files_loaded > 0 {
            tracing::info!(
                "Recovery: {} file(s) ({} via hint), {} live keys, {} entries, {} tombstones, {} corrupted, {} bytes unreadable",
                result.files_loaded,
                result.hint_files_used,
                self.keydir.len(),
                result.entries_loaded,
                result.tombstones_seen,
                result.entries_corrupted,
                result.unreadable_bytes
            );
        }

        Ok((ids, result))
    }

    /// Index a file from its hint. Returns false when there is no usable hint.
    ///
    /// Nothing is applied unless the whole hint file validates.
    fn load_from_hint(&self, id: u32, result: &mut RecoveryResult) -> Result<bool> {
        let hint_path = naming::hint_path(self.dir, id);
        if !hint_path.is_file() {
            return Ok(false);
        }

        let data_len = fs::metadata(naming::data_path(self.dir, id))?.len();
        let hints = match read_hint_file(&hint_path, data_len) {
            Ok(hints) => hints,
            Err(e) => {
                tracing::warn!(
                    "Ignoring hint {} ({}), replaying cask.{} instead",
                    hint_path.display(),
                    e,
                    id
                );
                return Ok(false);
            }
        };

        for hint in hints {
            result.max_timestamp = result.max_timestamp.max(hint.timestamp);
            if hint.is_tombstone() {
                continue;
            }
            self.keydir.set(
                hint.key,
                KeyDirEntry {
                    file_id: id,
                    value_pos: hint.value_pos,
                    value_size: hint.value_size,
                    timestamp: hint.timestamp,
                },
            );
            result.entries_loaded += 1;
        }

        result.hint_files_used += 1;
        tracing::debug!("Loaded cask.{} from hint", id);
        Ok(true)
    }

    fn replay_data_file(&self, id: u32, is_last: bool, result: &mut RecoveryResult) -> Result<()> {
        let path = naming::data_path(self.dir, id);
        let mut scanner = DataFileScanner::open(&path, id)?;

        for scanned in scanner.by_ref() {
            result.max_timestamp = result.max_timestamp.max(scanned.entry.timestamp);

            if scanned.entry.is_tombstone() {
                self.keydir.remove(&scanned.entry.key);
                result.tombstones_seen += 1;
                continue;
            }

            let entry = KeyDirEntry {
                file_id: id,
                value_pos: scanned.value_pos(),
                value_size: scanned.entry.value_size(),
                timestamp: scanned.entry.timestamp,
            };
            self.keydir.set(scanned.entry.key, entry);
            result.entries_loaded += 1;
        }

        result.entries_corrupted += scanner.corrupted();
        result.unreadable_bytes += scanner.skipped_bytes() + scanner.unread_tail();

        if scanner.torn_at().is_some() && is_last {
            result.damaged_tail = true;
            tracing::warn!(
                "{} ends in {} unreadable byte(s); it will be sealed",
                path.display(),
                scanner.unread_tail()
            );
        }

        tracing::debug!("Replayed cask.{}", id);
        Ok(())
    }

    fn remove_stray_merge_dir(&self) -> Result<()> {
        let merge_dir = naming::merge_dir(self.dir);
        if merge_dir.exists() {
            tracing::warn!(
                "Removing leftover merge directory {}",
                merge_dir.display()
            );
            fs::remove_dir_all(&merge_dir)?;
        }
        Ok(())
    }

    fn remove_orphan_hints(&self, data_ids: &[u32]) -> Result<()> {
        for id in naming::list_hint_files(self.dir)? {
            if data_ids.binary_search(&id).is_err() {
                let path = naming::hint_path(self.dir, id);
                tracing::warn!("Removing orphan hint file {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
