//! # CaskKV
//!
//! A log-structured, single-node key-value store with:
//! - Append-only data files with CRC-32 checked entries
//! - An in-memory hash index (KeyDir) for O(1) reads and writes
//! - Crash recovery by replaying data files or merge-written hint files
//! - Live merge (compaction) that never loses a concurrent write
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Store                                 │
//! │          set / get / delete / merge / close                  │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!   ┌───────────┐        ┌──────────────┐       ┌─────────────┐
//!   │  KeyDir   │        │ FileManager  │       │   Merger    │
//!   │ (RwLock)  │        │ active + RO  │       │ plan/compact│
//!   └───────────┘        └──────┬───────┘       │    /swap    │
//!         ▲                     │               └─────────────┘
//!         │                     ▼
//!   ┌───────────┐        ┌──────────────┐
//!   │  Loader   │◀───────│ cask.N files │
//!   │ (open)    │        │ + hint files │
//!   └───────────┘        └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskkv::{Config, Store};
//!
//! let store = Store::open("./data", Config::default())?;
//! store.set(b"hello", b"world")?;
//! assert_eq!(store.get(b"hello")?, b"world".to_vec());
//! store.delete(b"hello")?;
//! store.merge()?;
//! store.close()?;
//! # Ok::<(), caskkv::CaskError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod keydir;
pub mod storage;
pub mod recovery;
pub mod merge;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::Config;
pub use merge::MergeResult;
pub use recovery::RecoveryResult;
pub use store::{Store, StoreState, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
