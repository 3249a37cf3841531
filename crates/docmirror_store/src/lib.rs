//! # docmirror store
//!
//! Reference implementation of the docmirror Document Store SPI.
//!
//! This crate provides:
//! - `MemoryDocumentStore`: versioned documents, a global change counter,
//!   deletion stubs (tombstones) and tombstone purging
//! - A small selection-formula language used as the store's native
//!   predicate language (`Form = "Person" & StartsWith(Lastname; "L")`)
//! - CBOR snapshots and JSON import so a store survives restarts
//!
//! The sync engine never sees formulas; it passes predicate text through
//! and compares fingerprints.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod formula;
mod memory;
mod snapshot;

pub use formula::Formula;
pub use memory::MemoryDocumentStore;
pub use snapshot::ID_KEY;
