//! Storage Module
//!
//! On-disk file lifecycle for a store directory.
//!
//! ## Responsibilities
//! - Exactly one active (append) file, any number of immutable ones
//! - Rotation when the active file crosses `max_file_size`
//! - Positional reads by `(file_id, offset, size)`
//! - Hint files for compacted data files
//! - Single-writer directory lock
//!
//! ## Directory Layout
//! ```text
//! <dir>/
//!   ├── bitcask.lock      (owner pid)
//!   ├── cask.0            (immutable)
//!   ├── cask.0.hint       (present only for merge output)
//!   ├── cask.1            (immutable)
//!   ├── cask.7            (active: always the highest id)
//!   └── merge.tmp/        (scratch space, only while a merge runs)
//! ```

pub mod datafile;
pub mod hintfile;
pub mod lock;
pub mod naming;
pub mod platform;
mod manager;

pub use datafile::{DataFile, DataFileScanner, DataFileWriter, ScannedEntry};
pub use hintfile::{read_hint_file, HintFileWriter};
pub use lock::DirLock;
pub use manager::{Appended, FileManager};

pub(crate) use manager::id_space_exhausted;
