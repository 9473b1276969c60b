//! Tests for FileManager
//!
//! These tests verify:
//! - Opening over an empty or populated directory
//! - Appends land in the active file and are readable
//! - Rotation (including to a reserved id)
//! - Register/retire of merge files

use std::fs;
use std::path::PathBuf;

use caskkv::format::{encode, value_offset};
use caskkv::storage::naming::{data_path, hint_path};
use caskkv::storage::FileManager;
use caskkv::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_empty_directory_creates_file_zero() {
    let (_temp, path) = setup_temp_storage();

    let manager = FileManager::open(&path, &[]).unwrap();

    assert_eq!(manager.active_file_id(), 0);
    assert_eq!(manager.active_file_size(), 0);
    assert_eq!(manager.file_ids(), vec![0]);
    assert!(data_path(&path, 0).exists());
}

#[test]
fn test_open_uses_highest_id_as_active() {
    let (_temp, path) = setup_temp_storage();
    fs::write(data_path(&path, 1), encode(b"a", b"1", 1)).unwrap();
    fs::write(data_path(&path, 4), encode(b"b", b"2", 2)).unwrap();

    let manager = FileManager::open(&path, &[1, 4]).unwrap();

    assert_eq!(manager.active_file_id(), 4);
    assert_eq!(manager.immutable_ids(), vec![1]);
    assert_eq!(manager.active_file_size(), encode(b"b", b"2", 2).len() as u64);
    assert_eq!(manager.file_count(), 2);
}

// =============================================================================
// Append / Read Tests
// =============================================================================

#[test]
fn test_append_and_read_back() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();

    let first = encode(b"key", b"value", 1);
    let appended = manager.append_active(&first).unwrap();

    assert_eq!(appended.file_id, 0);
    assert_eq!(appended.offset, 0);
    assert_eq!(appended.value_pos, value_offset(3));
    assert_eq!(appended.file_size, first.len() as u64);

    let second = encode(b"k2", b"v2", 2);
    let appended = manager.append_active(&second).unwrap();
    assert_eq!(appended.offset, first.len() as u64);

    let value = manager.read_at(0, appended.value_pos, 2).unwrap();
    assert_eq!(value, b"v2".to_vec());
    assert_eq!(manager.total_bytes().unwrap(), (first.len() + second.len()) as u64);
}

#[test]
fn test_read_unknown_file() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();

    assert!(matches!(
        manager.read_at(9, 0, 1),
        Err(CaskError::FileNotFound(9))
    ));
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotate_starts_next_file() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();
    manager.append_active(&encode(b"a", b"1", 1)).unwrap();

    assert_eq!(manager.rotate().unwrap(), 1);

    assert_eq!(manager.active_file_id(), 1);
    assert_eq!(manager.active_file_size(), 0);
    assert_eq!(manager.immutable_ids(), vec![0]);
    assert!(data_path(&path, 1).exists());

    let appended = manager.append_active(&encode(b"b", b"2", 2)).unwrap();
    assert_eq!(appended.file_id, 1);
    assert_eq!(manager.read_at(1, appended.value_pos, 1).unwrap(), b"2".to_vec());
}

#[test]
fn test_rotate_to_leaves_gap() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();

    manager.rotate_to(5).unwrap();

    assert_eq!(manager.active_file_id(), 5);
    assert_eq!(manager.file_ids(), vec![0, 5]);
}

#[test]
fn test_rotate_to_rejects_lower_id() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();
    manager.rotate_to(3).unwrap();

    assert!(matches!(
        manager.rotate_to(3),
        Err(CaskError::InvalidArgument(_))
    ));
    assert!(matches!(
        manager.rotate_to(1),
        Err(CaskError::InvalidArgument(_))
    ));
}

// =============================================================================
// Register / Retire Tests
// =============================================================================

#[test]
fn test_register_and_retire() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();
    manager.rotate_to(3).unwrap();

    fs::write(data_path(&path, 2), encode(b"m", b"merged", 9)).unwrap();
    fs::write(hint_path(&path, 2), b"").unwrap();
    manager.register(2).unwrap();

    assert_eq!(manager.file_ids(), vec![0, 2, 3]);
    assert!(manager.has_hint(2));
    assert!(manager.handle(2).is_ok());

    manager.retire(2).unwrap();

    assert_eq!(manager.file_ids(), vec![0, 3]);
    assert!(!data_path(&path, 2).exists());
    assert!(!hint_path(&path, 2).exists());
    assert!(matches!(manager.handle(2), Err(CaskError::FileNotFound(2))));
}

#[test]
fn test_retire_active_rejected() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();

    assert!(matches!(
        manager.retire(0),
        Err(CaskError::InvalidArgument(_))
    ));
    assert!(data_path(&path, 0).exists());
}

#[test]
fn test_retired_handle_still_readable() {
    let (_temp, path) = setup_temp_storage();
    let manager = FileManager::open(&path, &[]).unwrap();
    let appended = manager.append_active(&encode(b"a", b"old", 1)).unwrap();
    manager.rotate().unwrap();

    let handle = manager.handle(0).unwrap();
    manager.retire(0).unwrap();

    assert_eq!(handle.read_at(appended.value_pos, 3).unwrap(), b"old".to_vec());
}
