//! Tests for merge (compaction)
//!
//! These tests verify:
//! - Merge keeps exactly the live set and reclaims space
//! - Tombstones and overwritten values are dropped
//! - The resulting directory layout (data + hint per output)
//! - Repeated merges are no-ops
//! - Writes and deletes that race a merge are never lost or resurrected
//! - A merge interrupted before or during swap reopens to the same data

use std::fs;
use std::path::{Path, PathBuf};

use caskkv::format::{encode, encode_tombstone};
use caskkv::keydir::{KeyDir, KeyDirEntry};
use caskkv::merge::Merger;
use caskkv::storage::naming::{data_path, hint_path, list_data_files, list_hint_files, merge_dir};
use caskkv::storage::FileManager;
use caskkv::{CaskError, Config, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn put(files: &FileManager, keydir: &KeyDir, key: &[u8], value: &[u8], timestamp: u64) {
    let appended = files.append_active(&encode(key, value, timestamp)).unwrap();
    keydir.set(
        key.to_vec(),
        KeyDirEntry {
            file_id: appended.file_id,
            value_pos: appended.value_pos,
            value_size: value.len() as u32,
            timestamp,
        },
    );
}

fn del(files: &FileManager, keydir: &KeyDir, key: &[u8], timestamp: u64) {
    files.append_active(&encode_tombstone(key, timestamp)).unwrap();
    keydir.remove(key);
}

/// Writes "k" ten times, sets then deletes "d", and sets "z", rotating once
/// when `rotate` is true. Returns the next free timestamp.
fn write_merge_fixture(files: &FileManager, keydir: &KeyDir, rotate: bool) -> u64 {
    put(files, keydir, b"z", b"zz", 1);
    put(files, keydir, b"d", b"doomed", 2);
    for i in 0..5u64 {
        put(files, keydir, b"k", format!("v{}", i).as_bytes(), 3 + i);
    }
    if rotate {
        files.rotate().unwrap();
    }
    for i in 5..10u64 {
        put(files, keydir, b"k", format!("v{}", i).as_bytes(), 3 + i);
    }
    del(files, keydir, b"d", 13);
    14
}

fn assert_fixture_reopens(path: &Path, k: &[u8]) {
    let store = Store::open(path, Config::default()).unwrap();
    assert_eq!(store.get(b"k").unwrap(), k.to_vec());
    assert_eq!(store.get(b"z").unwrap(), b"zz".to_vec());
    assert!(matches!(store.get(b"d"), Err(CaskError::KeyNotFound)));
    assert_eq!(store.stats().unwrap().key_count, 2);
}

fn read(files: &FileManager, keydir: &KeyDir, key: &[u8]) -> Option<Vec<u8>> {
    let entry = keydir.get(key)?;
    Some(
        files
            .read_at(entry.file_id, entry.value_pos, entry.value_size as usize)
            .unwrap(),
    )
}

// =============================================================================
// Basic Merge Tests
// =============================================================================

#[test]
fn test_merge_overwrites_end_to_end() {
    let (_temp, path) = setup_temp_dir();

    {
        let store = Store::open(&path, Config::default()).unwrap();
        for i in 0..10 {
            store.set(b"k", format!("v{}", i).as_bytes()).unwrap();
        }

        let result = store.merge().unwrap();
        assert_eq!(result.input_files, vec![0]);
        assert_eq!(result.output_files, vec![1]);
        assert_eq!(result.entries_scanned, 10);
        assert_eq!(result.live_entries, 1);
        assert!(result.bytes_saved() > 0);

        store.close().unwrap();
    }

    let store = Store::open(&path, Config::default()).unwrap();
    assert_eq!(store.get(b"k").unwrap(), b"v9".to_vec());

    // One compacted file with its hint, plus the empty active file
    assert_eq!(list_data_files(&path).unwrap(), vec![1, 2]);
    assert_eq!(list_hint_files(&path).unwrap(), vec![1]);
    assert_eq!(fs::metadata(data_path(&path, 2)).unwrap().len(), 0);
}

#[test]
fn test_merge_drops_deleted_keys() {
    let (_temp, path) = setup_temp_dir();

    {
        let store = Store::open(&path, Config::default()).unwrap();
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        store.delete(b"a").unwrap();

        let result = store.merge().unwrap();
        assert_eq!(result.live_entries, 1);

        assert!(matches!(store.get(b"a"), Err(CaskError::KeyNotFound)));
        assert_eq!(store.get(b"b").unwrap(), b"2".to_vec());
        store.close().unwrap();
    }

    let store = Store::open(&path, Config::default()).unwrap();
    assert_eq!(store.recovery_result().tombstones_seen, 0);
    assert!(matches!(store.get(b"a"), Err(CaskError::KeyNotFound)));
    assert_eq!(store.get(b"b").unwrap(), b"2".to_vec());
}

#[test]
fn test_merge_everything_deleted() {
    let (_temp, path) = setup_temp_dir();
    let store = Store::open(&path, Config::default()).unwrap();
    store.set(b"a", b"1").unwrap();
    store.delete(b"a").unwrap();

    let result = store.merge().unwrap();

    assert_eq!(result.input_files, vec![0]);
    assert!(result.output_files.is_empty());
    assert_eq!(result.bytes_after, 0);
    assert_eq!(store.stats().unwrap().file_count, 1);
    assert!(store.merge().unwrap().is_noop());
}

#[test]
fn test_merge_across_rotated_files() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().max_file_size(256).build();
    let store = Store::open(&path, config.clone()).unwrap();

    for round in 0..5 {
        for i in 0..20 {
            store
                .set(
                    format!("key{:02}", i).as_bytes(),
                    format!("round{}-{}", round, i).as_bytes(),
                )
                .unwrap();
        }
    }
    let before = store.stats().unwrap();
    assert!(before.file_count > 2);

    let result = store.merge().unwrap();

    assert!(result.output_files.len() <= result.input_files.len());
    assert_eq!(result.live_entries, 20);
    assert!(result.bytes_after < result.bytes_before);
    for i in 0..20 {
        assert_eq!(
            store.get(format!("key{:02}", i).as_bytes()).unwrap(),
            format!("round4-{}", i).into_bytes()
        );
    }

    store.close().unwrap();
    let store = Store::open(&path, config).unwrap();
    assert_eq!(
        store.recovery_result().hint_files_used,
        result.output_files.len() as u64
    );
    assert_eq!(store.stats().unwrap().key_count, 20);
}

#[test]
fn test_merge_empty_store_is_noop() {
    let (_temp, path) = setup_temp_dir();
    let store = Store::open(&path, Config::default()).unwrap();

    let result = store.merge().unwrap();

    assert!(result.is_noop());
    assert_eq!(store.active_file_id(), 0);
}

#[test]
fn test_second_merge_is_noop() {
    let (_temp, path) = setup_temp_dir();
    let store = Store::open(&path, Config::default()).unwrap();
    store.set(b"a", b"1").unwrap();
    store.set(b"a", b"2").unwrap();

    assert!(!store.merge().unwrap().is_noop());
    let files_after_first = list_data_files(&path).unwrap();

    assert!(store.merge().unwrap().is_noop());
    assert_eq!(list_data_files(&path).unwrap(), files_after_first);
    assert_eq!(store.get(b"a").unwrap(), b"2".to_vec());
}

#[test]
fn test_merge_of_several_hinted_outputs_is_noop() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().max_file_size(256).build();
    let store = Store::open(&path, config).unwrap();
    for round in 0..3 {
        for i in 0..20 {
            store
                .set(format!("key{:02}", i).as_bytes(), format!("round{}", round).as_bytes())
                .unwrap();
        }
    }

    let first = store.merge().unwrap();
    assert!(first.output_files.len() > 1);
    let files_after_first = list_data_files(&path).unwrap();

    assert!(store.merge().unwrap().is_noop());
    assert_eq!(list_data_files(&path).unwrap(), files_after_first);
    assert_eq!(list_hint_files(&path).unwrap(), first.output_files);

    // A fresh write makes the next merge real again
    store.set(b"key00", b"fresh").unwrap();
    assert!(!store.merge().unwrap().is_noop());
    assert_eq!(store.get(b"key00").unwrap(), b"fresh".to_vec());
}

#[test]
fn test_writes_after_merge_survive_reopen() {
    let (_temp, path) = setup_temp_dir();

    {
        let store = Store::open(&path, Config::default()).unwrap();
        store.set(b"a", b"1").unwrap();
        store.merge().unwrap();
        store.set(b"a", b"2").unwrap();
        store.set(b"b", b"3").unwrap();
        store.close().unwrap();
    }

    let store = Store::open(&path, Config::default()).unwrap();
    assert_eq!(store.get(b"a").unwrap(), b"2".to_vec());
    assert_eq!(store.get(b"b").unwrap(), b"3".to_vec());
}

#[test]
fn test_merge_after_close_fails() {
    let (_temp, path) = setup_temp_dir();
    let store = Store::open(&path, Config::default()).unwrap();
    store.close().unwrap();

    assert!(matches!(store.merge(), Err(CaskError::NotOpen)));
}

// =============================================================================
// Phase Tests (writes landing between plan and swap)
// =============================================================================

#[test]
fn test_plan_seals_active_and_reserves_ids() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::default();
    let files = FileManager::open(&path, &[]).unwrap();
    let keydir = KeyDir::new();
    put(&files, &keydir, b"a", b"1", 1);
    files.rotate().unwrap();
    put(&files, &keydir, b"b", b"2", 2);

    let merger = Merger::new(&config, &files, &keydir);
    let plan = merger.plan().unwrap().unwrap();

    assert_eq!(plan.inputs, vec![0, 1]);
    assert_eq!(plan.output_ids, vec![2, 3]);
    assert_eq!(files.active_file_id(), 4);
}

#[test]
fn test_write_during_merge_wins() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::default();
    let files = FileManager::open(&path, &[]).unwrap();
    let keydir = KeyDir::new();
    put(&files, &keydir, b"stable", b"s", 1);
    put(&files, &keydir, b"raced", b"before", 2);

    let merger = Merger::new(&config, &files, &keydir);
    let plan = merger.plan().unwrap().unwrap();
    let compacted = merger.compact(&plan).unwrap();

    // Lands in the new active file while the merge output is pending
    put(&files, &keydir, b"raced", b"during", 3);

    let result = merger.swap(&plan, compacted).unwrap();

    assert_eq!(result.output_files, vec![1]);
    assert_eq!(keydir.get(b"stable").map(|e| e.file_id), Some(1));
    assert_eq!(keydir.get(b"raced").map(|e| e.file_id), Some(2));
    assert_eq!(read(&files, &keydir, b"raced"), Some(b"during".to_vec()));
    assert_eq!(read(&files, &keydir, b"stable"), Some(b"s".to_vec()));
    assert_eq!(files.file_ids(), vec![1, 2]);
}

#[test]
fn test_delete_during_merge_not_resurrected() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::default();
    let files = FileManager::open(&path, &[]).unwrap();
    let keydir = KeyDir::new();
    put(&files, &keydir, b"doomed", b"x", 1);

    let merger = Merger::new(&config, &files, &keydir);
    let plan = merger.plan().unwrap().unwrap();
    let compacted = merger.compact(&plan).unwrap();

    keydir.remove(b"doomed");
    merger.swap(&plan, compacted).unwrap();

    assert!(!keydir.contains_key(b"doomed"));
}

// =============================================================================
// Interrupted Merge Tests (crash between phases, then reopen)
// =============================================================================

#[test]
fn test_reopen_after_compact_without_swap() {
    let (_temp, path) = setup_temp_dir();

    {
        let config = Config::default();
        let files = FileManager::open(&path, &[]).unwrap();
        let keydir = KeyDir::new();
        let ts = write_merge_fixture(&files, &keydir, false);

        let merger = Merger::new(&config, &files, &keydir);
        let plan = merger.plan().unwrap().unwrap();
        merger.compact(&plan).unwrap();
        put(&files, &keydir, b"k", b"after", ts);
        files.sync_active().unwrap();
        // Dropped here: the swap never runs
    }

    // Input, installed output with hint, and the post-merge active file
    assert_eq!(list_data_files(&path).unwrap(), vec![0, 1, 2]);
    assert_eq!(list_hint_files(&path).unwrap(), vec![1]);

    assert_fixture_reopens(&path, b"after");
}

#[test]
fn test_reopen_after_lowest_input_retired() {
    let (_temp, path) = setup_temp_dir();

    {
        let config = Config::default();
        let files = FileManager::open(&path, &[]).unwrap();
        let keydir = KeyDir::new();
        write_merge_fixture(&files, &keydir, true);

        let merger = Merger::new(&config, &files, &keydir);
        let plan = merger.plan().unwrap().unwrap();
        assert_eq!(plan.inputs, vec![0, 1]);
        merger.compact(&plan).unwrap();
    }

    // Swap deleted cask.0 and then stopped before cask.1
    fs::remove_file(data_path(&path, 0)).unwrap();

    assert_fixture_reopens(&path, b"v9");
}

#[test]
fn test_reopen_with_hint_but_no_data_for_output() {
    let (_temp, path) = setup_temp_dir();

    {
        let config = Config::default();
        let files = FileManager::open(&path, &[]).unwrap();
        let keydir = KeyDir::new();
        write_merge_fixture(&files, &keydir, false);

        let merger = Merger::new(&config, &files, &keydir);
        let plan = merger.plan().unwrap().unwrap();
        merger.compact(&plan).unwrap();
    }

    // Install renames the hint first; stop before the data rename
    fs::remove_file(data_path(&path, 1)).unwrap();
    assert!(hint_path(&path, 1).exists());

    assert_fixture_reopens(&path, b"v9");
    assert!(!hint_path(&path, 1).exists());
}

#[test]
fn test_reopen_with_outputs_left_in_merge_dir() {
    let (_temp, path) = setup_temp_dir();

    {
        let config = Config::default();
        let files = FileManager::open(&path, &[]).unwrap();
        let keydir = KeyDir::new();
        write_merge_fixture(&files, &keydir, true);

        let merger = Merger::new(&config, &files, &keydir);
        let plan = merger.plan().unwrap().unwrap();
        merger.compact(&plan).unwrap();
    }

    // Put the outputs back where compact writes them before install
    let scratch = merge_dir(&path);
    fs::create_dir_all(&scratch).unwrap();
    for id in list_hint_files(&path).unwrap() {
        fs::rename(hint_path(&path, id), hint_path(&scratch, id)).unwrap();
        fs::rename(data_path(&path, id), data_path(&scratch, id)).unwrap();
    }

    assert_fixture_reopens(&path, b"v9");
    assert!(!scratch.exists());
    assert!(list_hint_files(&path).unwrap().is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writes_during_merge() {
    let (_temp, path) = setup_temp_dir();
    let config = Config::builder().max_file_size(1024).build();
    let store = Store::open(&path, config.clone()).unwrap();

    for i in 0..200 {
        store.set(format!("key{}", i).as_bytes(), b"initial").unwrap();
    }

    crossbeam::scope(|s| {
        s.spawn(|_| {
            for _ in 0..5 {
                store.merge().unwrap();
            }
        });
        s.spawn(|_| {
            for i in 0..200 {
                let key = format!("key{}", i);
                if i % 10 == 0 {
                    store.delete(key.as_bytes()).unwrap();
                } else {
                    store.set(key.as_bytes(), format!("updated{}", i).as_bytes()).unwrap();
                }
            }
        });
        s.spawn(|_| {
            for i in 0..200 {
                match store.get(format!("key{}", i).as_bytes()) {
                    Ok(_) | Err(CaskError::KeyNotFound) => {}
                    Err(e) => panic!("read failed during merge: {}", e),
                }
            }
        });
    })
    .unwrap();

    let check = |store: &Store| {
        for i in 0..200 {
            let result = store.get(format!("key{}", i).as_bytes());
            if i % 10 == 0 {
                assert!(matches!(result, Err(CaskError::KeyNotFound)), "key{}", i);
            } else {
                assert_eq!(result.unwrap(), format!("updated{}", i).into_bytes());
            }
        }
    };

    check(&store);
    store.merge().unwrap();
    check(&store);

    store.close().unwrap();
    let store = Store::open(&path, config).unwrap();
    check(&store);
}
