//! Directory lock
//!
//! `<dir>/bitcask.lock` holds the owning process id as text. A lock whose
//! owner is no longer running (or whose content is unreadable) is stale and
//! gets reclaimed. The file is removed on `release()` or when the guard is
//! dropped, so every exit path of `Store::open`/`Store::close` lets go of it.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};

use super::naming::LOCK_FILE;
use super::platform;

/// Attempts before giving up on a lock that keeps reappearing
const ACQUIRE_ATTEMPTS: usize = 3;

/// Held single-writer lock on a store directory
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    released: bool,
}

impl DirLock {
    /// Acquire the lock for `dir`, reclaiming it if stale
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let pid = std::process::id();

        for _ in 0..ACQUIRE_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(pid.to_string().as_bytes())?;
                    file.sync_all()?;
                    tracing::debug!("Acquired {} for pid {}", path.display(), pid);
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match Self::owner_at(&path)? {
                        Some(owner) if platform::process_alive(owner) => {
                            return Err(CaskError::LockConflict { pid: owner, path });
                        }
                        owner => {
                            tracing::warn!(
                                "Reclaiming stale lock {} (owner {:?} is gone)",
                                path.display(),
                                owner
                            );
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let owner = Self::owner_at(&path)?.unwrap_or(0);
        Err(CaskError::LockConflict { pid: owner, path })
    }

    /// Process id recorded in `dir`'s lock file, if any
    pub fn owner(dir: &Path) -> Result<Option<u32>> {
        Self::owner_at(&dir.join(LOCK_FILE))
    }

    fn owner_at(path: &Path) -> Result<Option<u32>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove lock {}: {}", self.path.display(), e);
                }
            }
        }
    }
}
