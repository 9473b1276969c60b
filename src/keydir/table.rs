//! KeyDir implementation
//!
//! HashMap-based index with RwLock for concurrency.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::KeyDirEntry;

/// Concurrent key → location index
#[derive(Debug, Default)]
pub struct KeyDir {
    map: RwLock<HashMap<Vec<u8>, KeyDirEntry>>,
}

impl KeyDir {
    /// Create a new empty KeyDir
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.map.read().get(key).copied()
    }

    /// Insert or overwrite a key (write lock). Returns the previous entry.
    pub fn set(&self, key: Vec<u8>, entry: KeyDirEntry) -> Option<KeyDirEntry> {
        self.map.write().insert(key, entry)
    }

    /// Remove a key (write lock). Returns the removed entry.
    pub fn remove(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.map.write().remove(key)
    }

    /// Replace the entry for `key` with `entry` only if the current entry
    /// satisfies `should_replace`. Absent keys are never inserted.
    ///
    /// Check and replace happen under one write lock.
    pub fn relocate<F>(&self, key: &[u8], entry: KeyDirEntry, should_replace: F) -> bool
    where
        F: FnOnce(&KeyDirEntry) -> bool,
    {
        let mut map = self.map.write();
        match map.get_mut(key) {
            Some(current) if should_replace(current) => {
                *current = entry;
                true
            }
            _ => false,
        }
    }

    /// Remove `key` only if its current entry satisfies `pred`
    pub fn remove_if<F>(&self, key: &[u8], pred: F) -> bool
    where
        F: FnOnce(&KeyDirEntry) -> bool,
    {
        let mut map = self.map.write();
        match map.get(key) {
            Some(current) if pred(current) => {
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Visit every entry under a read lock
    ///
    /// `f` must not call back into this KeyDir.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], &KeyDirEntry),
    {
        let map = self.map.read();
        for (key, entry) in map.iter() {
            f(key, entry);
        }
    }

    /// Snapshot of all live keys (unordered)
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.read().keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.map.write().clear();
    }
}
