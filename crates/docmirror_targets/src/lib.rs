//! # docmirror targets
//!
//! Sink adapters built purely on the `SyncTarget` contract:
//!
//! - [`MemoryIndexTarget`]: concurrent in-process collection with
//!   per-field equality indexes. Best-effort apply.
//! - [`SqliteTarget`]: one SQLite table holding each document's projection
//!   as JSON. Transactional: a pass commits or rolls back as a whole.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;
mod sqlite;

pub use memory::{MemoryIndexTarget, TargetEntry};
pub use sqlite::{JournalMode, SqliteTarget, SqliteTargetConfig};
