//! # docmirror core
//!
//! Data model and capability contracts shared by every docmirror crate.
//!
//! This crate provides:
//! - Document identity, versions, watermarks and predicate fingerprints
//! - Raw field values and projection field sets
//! - The Document Store SPI consumed by the sync engine
//! - The Sync Target SPI implemented by sink adapters
//! - The Watermark Store SPI that persists per-pair sync state
//!
//! It contains no synchronization logic; see `docmirror_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod id;
mod state;
mod store;
mod target;
mod types;
mod value;

pub use error::{CoreError, CoreResult};
pub use id::DocumentId;
pub use state::{PairKey, PairLease, SyncState, SyncStateStore};
pub use store::{ChangeEntry, ChangeScan, ChangeStatus, DocumentSnapshot, DocumentStore};
pub use target::SyncTarget;
pub use types::{Fingerprint, Predicate, Version, Watermark};
pub use value::{FieldSet, Fields, Value};

/// docmirror version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
