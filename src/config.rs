//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults. A `Config` is handed to
//! `Store::open` by value and never changes while the store is open.

use crate::error::{CaskError, Result};
use crate::format::TOMBSTONE_SENTINEL;

/// Main configuration for a CaskKV store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Lifecycle
    // -------------------------------------------------------------------------
    /// Rotate the active file once its size reaches this many bytes
    pub max_file_size: u64,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// fsync the active file after every Set/Delete.
    /// When false, durability is left to OS buffering (or `Store::sync`).
    pub sync_on_write: bool,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Maximum key length in bytes (keys must also be non-empty)
    pub max_key_size: usize,

    /// Maximum value length in bytes
    pub max_value_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: false,
            max_key_size: 1024,
            max_value_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(CaskError::Config("max_file_size must be > 0".into()));
        }
        if self.max_key_size == 0 || self.max_key_size as u64 > u32::MAX as u64 {
            return Err(CaskError::Config(
                "max_key_size must be in [1, u32::MAX]".into(),
            ));
        }
        // u32::MAX is reserved as the tombstone marker
        if self.max_value_size as u64 >= TOMBSTONE_SENTINEL as u64 {
            return Err(CaskError::Config(format!(
                "max_value_size must be < {}",
                TOMBSTONE_SENTINEL
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the rotation threshold for the active file (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Enable or disable fsync after every write
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.config.sync_on_write = sync;
        self
    }

    /// Set the maximum key size (in bytes)
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    /// Set the maximum value size (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
