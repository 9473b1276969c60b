//! Merge
//!
//! Reclaims space held by overwritten and deleted keys while the store stays
//! live.
//!
//! ## Phases
//! ```text
//!  plan     (write lock)  seal active file, reserve output ids
//!  compact  (no lock)     scan inputs, write merge.tmp/cask.<id>[.hint],
//!                         fsync, rename into the store directory
//!  swap     (write lock)  register outputs, relocate KeyDir entries that
//!                         still point at inputs, delete inputs
//! ```
//!
//! ## File Id Layout
//! With inputs `i1 < .. < in` (the sealed active file included), outputs
//! take ids `in+1 ..= in+n` and the new active file is `in+n+1`. Recovery
//! replays inputs, then outputs, then anything written after the merge
//! began. Inputs are deleted in ascending order, so a tombstone always
//! outlives the older values it shadows. Every crash point therefore replays
//! to the same KeyDir.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::format;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::storage::{
    id_space_exhausted, naming, platform, DataFileScanner, DataFileWriter, FileManager,
    HintFileWriter,
};

/// Outcome of a merge
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Files that were compacted and deleted
    pub input_files: Vec<u32>,

    /// Compacted files written (each with a hint)
    pub output_files: Vec<u32>,

    /// Valid records read from the inputs
    pub entries_scanned: u64,

    /// Records written to the outputs
    pub live_entries: u64,

    /// Total input size
    pub bytes_before: u64,

    /// Total output size
    pub bytes_after: u64,
}

impl MergeResult {
    /// Whether the merge had nothing to do
    pub fn is_noop(&self) -> bool {
        self.input_files.is_empty()
    }

    /// Bytes reclaimed
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Inputs and reserved output ids fixed at the start of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Files to compact, ascending
    pub inputs: Vec<u32>,

    /// Ids the output may use, ascending
    pub output_ids: Vec<u32>,
}

/// Latest version of a key seen so far in the inputs
#[derive(Debug, Clone, Copy)]
struct Candidate {
    file_id: u32,
    offset: u64,
    entry_len: u64,
    value_size: u32,
    timestamp: u64,
}

/// A key's new home in the merge output
#[derive(Debug, Clone)]
struct Relocation {
    key: Vec<u8>,
    entry: KeyDirEntry,
}

/// Output of the compact phase, consumed by `swap`
#[derive(Debug, Default)]
pub struct Compacted {
    relocations: Vec<Relocation>,
    output_files: Vec<u32>,
    entries_scanned: u64,
    bytes_before: u64,
    bytes_after: u64,
}

/// Runs the phases of a merge against a store's components
///
/// The caller provides the locking: `plan` and `swap` must run under the
/// store's write lock, `compact` must not.
pub struct Merger<'a> {
    config: &'a Config,
    files: &'a FileManager,
    keydir: &'a KeyDir,
}

impl<'a> Merger<'a> {
    pub fn new(config: &'a Config, files: &'a FileManager, keydir: &'a KeyDir) -> Self {
        Self {
            config,
            files,
            keydir,
        }
    }

    // =========================================================================
    // Plan
    // =========================================================================

    /// Seal the active file and reserve output ids
    ///
    /// Returns `None` when there is nothing to reclaim: the active file is
    /// empty and every immutable file is the hinted output of an earlier
    /// merge (or there are none).
    pub fn plan(&self) -> Result<Option<MergePlan>> {
        let immutable = self.files.immutable_ids();
        let active_id = self.files.active_file_id();
        let active_empty = self.files.active_file_size() == 0;

        if active_empty {
            let already_compact = immutable.iter().all(|&id| self.files.has_hint(id));
            if already_compact {
                tracing::debug!("Merge skipped: nothing to reclaim");
                return Ok(None);
            }
        }

        let mut inputs = immutable;
        inputs.push(active_id);

        let n = inputs.len() as u32;
        let first_output = active_id.checked_add(1).ok_or_else(id_space_exhausted)?;
        let new_active = active_id
            .checked_add(n)
            .and_then(|id| id.checked_add(1))
            .ok_or_else(id_space_exhausted)?;

        self.files.rotate_to(new_active)?;

        Ok(Some(MergePlan {
            inputs,
            output_ids: (first_output..new_active).collect(),
        }))
    }

    // =========================================================================
    // Compact
    // =========================================================================

    /// Scan the inputs and write the live set into the store directory
    ///
    /// On error, output files already moved into the store directory are
    /// removed again and the inputs stay authoritative.
    pub fn compact(&self, plan: &MergePlan) -> Result<Compacted> {
        let dir = self.files.dir();
        let merge_dir = naming::merge_dir(dir);

        let mut compacted = Compacted::default();
        let candidates = self.collect_candidates(plan, &mut compacted)?;

        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let written = self
            .write_outputs(plan, candidates, &merge_dir, &mut compacted)
            .and_then(|()| self.install_outputs(dir, &merge_dir, &compacted.output_files));

        if let Err(e) = fs::remove_dir_all(&merge_dir) {
            tracing::warn!("Failed to remove {}: {}", merge_dir.display(), e);
        }

        written?;
        Ok(compacted)
    }

    /// Build the key → latest version map across all inputs
    fn collect_candidates(
        &self,
        plan: &MergePlan,
        compacted: &mut Compacted,
    ) -> Result<HashMap<Vec<u8>, Candidate>> {
        let mut candidates: HashMap<Vec<u8>, Candidate> = HashMap::new();

        for &id in &plan.inputs {
            let handle = self.files.handle(id)?;
            let mut scanner = DataFileScanner::open(handle.path(), id)?;
            compacted.bytes_before += scanner.file_len();

            for scanned in scanner.by_ref() {
                compacted.entries_scanned += 1;
                let timestamp = scanned.entry.timestamp;

                // Inputs are read oldest first, so ties go to the later record
                let newer = candidates
                    .get(&scanned.entry.key)
                    .map_or(true, |c| timestamp >= c.timestamp);
                if !newer {
                    continue;
                }

                if scanned.entry.is_tombstone() {
                    candidates.remove(&scanned.entry.key);
                    continue;
                }

                let candidate = Candidate {
                    file_id: id,
                    offset: scanned.offset,
                    entry_len: scanned.entry_len(),
                    value_size: scanned.entry.value_size(),
                    timestamp,
                };
                candidates.insert(scanned.entry.key, candidate);
            }

            if scanner.corrupted() > 0 || scanner.torn_at().is_some() {
                tracing::warn!(
                    "Merge input cask.{} had {} corrupt record(s){}",
                    id,
                    scanner.corrupted(),
                    if scanner.torn_at().is_some() { " and a torn tail" } else { "" }
                );
            }
        }

        Ok(candidates)
    }

    /// Write the surviving entries, sorted by key, into `merge_dir`
    fn write_outputs(
        &self,
        plan: &MergePlan,
        candidates: HashMap<Vec<u8>, Candidate>,
        merge_dir: &Path,
        compacted: &mut Compacted,
    ) -> Result<()> {
        let mut live: Vec<(Vec<u8>, Candidate)> = candidates.into_iter().collect();
        live.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut ids = plan.output_ids.iter().copied();
        let mut current: Option<(DataFileWriter, HintFileWriter)> = None;

        for (key, candidate) in live {
            let needs_new = match &current {
                None => true,
                Some((data, _)) => {
                    data.size() >= self.config.max_file_size && ids.len() > 0
                }
            };
            if needs_new {
                if let Some(done) = current.take() {
                    compacted.bytes_after += finish_output(done)?;
                }
                // The last reserved id absorbs any remainder, so this only
                // runs while ids are left.
                let id = ids.next().ok_or_else(id_space_exhausted)?;
                let data = DataFileWriter::create(&naming::data_path(merge_dir, id), id)?;
                let hint = HintFileWriter::create(&naming::hint_path(merge_dir, id))?;
                compacted.output_files.push(id);
                current = Some((data, hint));
            }

            if let Some((data, hint)) = current.as_mut() {
                // Copy the record verbatim after re-verifying it
                let bytes = self.files.read_at(
                    candidate.file_id,
                    candidate.offset,
                    candidate.entry_len as usize,
                )?;
                format::decode(&bytes)?;

                let offset = data.append(&bytes)?;
                let value_pos = offset + format::value_offset(key.len());
                hint.add(&key, candidate.value_size, value_pos, candidate.timestamp)?;

                compacted.relocations.push(Relocation {
                    key,
                    entry: KeyDirEntry {
                        file_id: data.id(),
                        value_pos,
                        value_size: candidate.value_size,
                        timestamp: candidate.timestamp,
                    },
                });
            }
        }

        if let Some(done) = current.take() {
            compacted.bytes_after += finish_output(done)?;
        }

        platform::sync_dir(merge_dir)?;
        Ok(())
    }

    /// Move outputs from `merge_dir` into `dir`, hint before data, ascending
    fn install_outputs(&self, dir: &Path, merge_dir: &Path, outputs: &[u32]) -> Result<()> {
        for (done, &id) in outputs.iter().enumerate() {
            let moved = fs::rename(naming::hint_path(merge_dir, id), naming::hint_path(dir, id))
                .and_then(|()| {
                    fs::rename(naming::data_path(merge_dir, id), naming::data_path(dir, id))
                });

            if let Err(e) = moved {
                tracing::error!("Failed to install merge output cask.{}: {}", id, e);
                for &undo in &outputs[..=done] {
                    let _ = fs::remove_file(naming::hint_path(dir, undo));
                    let _ = fs::remove_file(naming::data_path(dir, undo));
                }
                let _ = platform::sync_dir(dir);
                return Err(e.into());
            }
        }

        platform::sync_dir(dir)?;
        Ok(())
    }

    // =========================================================================
    // Swap
    // =========================================================================

    /// Point the KeyDir at the outputs and delete the inputs
    ///
    /// A key is relocated only while its entry still points into an input
    /// file; anything written since `plan` lives in a newer file and wins.
    pub fn swap(&self, plan: &MergePlan, compacted: Compacted) -> Result<MergeResult> {
        for &id in &compacted.output_files {
            if let Err(e) = self.files.register(id) {
                // Unreferenced outputs must not linger next to the inputs
                for &undo in &compacted.output_files {
                    if let Err(cleanup) = self.files.retire(undo) {
                        tracing::error!("Failed to discard merge output cask.{}: {}", undo, cleanup);
                    }
                }
                return Err(e);
            }
        }

        let inputs: HashSet<u32> = plan.inputs.iter().copied().collect();
        let mut live_entries = 0;

        for relocation in compacted.relocations {
            self.keydir.relocate(&relocation.key, relocation.entry, |current| {
                inputs.contains(&current.file_id)
            });
            live_entries += 1;
        }

        // Only a record skipped as corrupt during the scan leaves a key here
        let mut dangling = Vec::new();
        self.keydir.for_each(|key, entry| {
            if inputs.contains(&entry.file_id) {
                dangling.push(key.to_vec());
            }
        });
        for key in dangling {
            if self
                .keydir
                .remove_if(&key, |entry| inputs.contains(&entry.file_id))
            {
                tracing::warn!(
                    "Dropping key {:?}: its record was unreadable during merge",
                    String::from_utf8_lossy(&key)
                );
            }
        }

        for &id in &plan.inputs {
            self.files.retire(id)?;
        }
        platform::sync_dir(self.files.dir())?;

        let result = MergeResult {
            input_files: plan.inputs.clone(),
            output_files: compacted.output_files,
            entries_scanned: compacted.entries_scanned,
            live_entries,
            bytes_before: compacted.bytes_before,
            bytes_after: compacted.bytes_after,
        };

        tracing::info!(
            "Merged {} file(s) into {}: {} → {} bytes, {} live of {} scanned",
            result.input_files.len(),
            result.output_files.len(),
            result.bytes_before,
            result.bytes_after,
            result.live_entries,
            result.entries_scanned
        );

        Ok(result)
    }
}

/// fsync a finished output pair, returning the data file size
fn finish_output((mut data, hint): (DataFileWriter, HintFileWriter)) -> Result<u64> {
    data.sync()?;
    hint.finish()?;
    Ok(data.size())
}
