//! # docmirror engine
//!
//! Keeps a pluggable secondary store (the *target*) consistent with the
//! documents of a primary store that satisfy a caller-supplied predicate.
//!
//! This crate provides:
//! - The sync pass: scan, delta computation, apply, result aggregation
//! - Scan-mode selection (full reconciliation vs incremental scan)
//! - Best-effort and transactional apply policies
//! - Per-(store, target) pass exclusivity, cancellation and timeouts
//! - Watermark stores (in-memory and file-backed)
//!
//! ## Architecture
//!
//! Each pass:
//! 1. Loads the pair's prior watermark and predicate fingerprint
//! 2. Selects a scan mode: full reconciliation when the fingerprint
//!    changed or no state exists, incremental scan otherwise
//! 3. Computes the minimal delta against the target's current ID set
//! 4. Fetches projections concurrently, then applies the delta serially
//! 5. Persists the new watermark and fingerprint
//!
//! ## Key Invariants
//!
//! - After a successful pass the target holds exactly the matching IDs
//! - A stored version never decreases
//! - At most one pass runs per (store, target) pair
//! - A failed, cancelled or timed-out pass leaves the persisted state untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod engine;
mod error;
mod exclusive;
mod plan;
mod state_store;

pub use apply::{ApplyFailure, Operation};
pub use config::{CancelToken, ConcurrentPassPolicy, PassOptions, SyncConfig};
pub use engine::{SyncEngine, SyncResult, SyncStats};
pub use error::{EngineResult, SyncError};
pub use exclusive::PassRegistry;
pub use plan::ScanMode;
pub use state_store::{FileStateStore, MemoryStateStore};
