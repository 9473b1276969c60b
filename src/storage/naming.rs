//! File naming
//!
//! Every on-disk name is a pure function of a file id:
//! `cask.<id>` for data, `cask.<id>.hint` for hints (decimal, no padding).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Advisory single-writer lock file
pub const LOCK_FILE: &str = "bitcask.lock";

/// Scratch directory used while a merge writes its output
pub const MERGE_DIR: &str = "merge.tmp";

const DATA_PREFIX: &str = "cask.";
const HINT_SUFFIX: &str = ".hint";

/// `<dir>/cask.<id>`
pub fn data_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}", DATA_PREFIX, id))
}

/// `<dir>/cask.<id>.hint`
pub fn hint_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}{}", DATA_PREFIX, id, HINT_SUFFIX))
}

/// `<dir>/merge.tmp`
pub fn merge_dir(dir: &Path) -> PathBuf {
    dir.join(MERGE_DIR)
}

/// Parse a data file name: "cask.42" → Some(42)
///
/// Only the canonical spelling is accepted ("cask.042" is ignored), so a
/// parsed id always maps back to the same file name.
pub fn parse_data_file_id(name: &str) -> Option<u32> {
    parse_id(name.strip_prefix(DATA_PREFIX)?)
}

/// Parse a hint file name: "cask.42.hint" → Some(42)
pub fn parse_hint_file_id(name: &str) -> Option<u32> {
    parse_id(name.strip_prefix(DATA_PREFIX)?.strip_suffix(HINT_SUFFIX)?)
}

fn parse_id(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: u32 = digits.parse().ok()?;
    (id.to_string() == digits).then_some(id)
}

/// Ids of all data files in `dir`, ascending
pub fn list_data_files(dir: &Path) -> Result<Vec<u32>> {
    list_ids(dir, parse_data_file_id)
}

/// Ids of all hint files in `dir`, ascending
pub fn list_hint_files(dir: &Path) -> Result<Vec<u32>> {
    list_ids(dir, parse_hint_file_id)
}

fn list_ids(dir: &Path, parse: fn(&str) -> Option<u32>) -> Result<Vec<u32>> {
    let mut ids = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(parse) {
            ids.push(id);
        }
    }

    ids.sort_unstable();
    Ok(ids)
}
