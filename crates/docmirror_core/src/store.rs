//! Document Store SPI consumed by the sync engine.

use crate::error::CoreResult;
use crate::id::DocumentId;
use crate::types::{Predicate, Version, Watermark};
use crate::value::{FieldSet, Fields};
use std::collections::HashSet;

/// How a changed document relates to the predicate right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    /// The document exists and satisfies the predicate.
    Matched,
    /// The document exists and does not satisfy the predicate.
    Unmatched,
    /// The document was deleted (tombstone).
    Deleted,
}

/// One document reported by a change scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    /// Document ID.
    pub id: DocumentId,
    /// Live version; for tombstones, the version at deletion.
    pub version: Version,
    /// Predicate outcome or tombstone marker.
    pub status: ChangeStatus,
}

impl ChangeEntry {
    /// Creates an entry for a document that matches the predicate.
    pub fn matched(id: DocumentId, version: Version) -> Self {
        Self {
            id,
            version,
            status: ChangeStatus::Matched,
        }
    }

    /// Creates an entry for a document that does not match the predicate.
    pub fn unmatched(id: DocumentId, version: Version) -> Self {
        Self {
            id,
            version,
            status: ChangeStatus::Unmatched,
        }
    }

    /// Creates a tombstone entry.
    pub fn deleted(id: DocumentId, version: Version) -> Self {
        Self {
            id,
            version,
            status: ChangeStatus::Deleted,
        }
    }
}

/// Result of `DocumentStore::scan_since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScan {
    /// Every document changed or deleted after the requested watermark.
    pub entries: Vec<ChangeEntry>,
    /// Watermark covering everything this scan observed.
    pub watermark: Watermark,
}

/// A document's fields as seen at one version.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Version the fields belong to.
    pub version: Version,
    /// Projected field values.
    pub fields: Fields,
}

/// The primary document store, as seen by the sync engine.
///
/// Implementations provide a consistent read view for each call; the
/// engine never writes through this trait.
pub trait DocumentStore: Send + Sync {
    /// Stable identity of the store, used to key persisted sync state.
    fn store_id(&self) -> &str;

    /// Evaluates the predicate over the whole store.
    ///
    /// Returns the IDs of every live document that currently matches.
    fn evaluate_all(&self, predicate: &Predicate) -> CoreResult<HashSet<DocumentId>>;

    /// Enumerates documents changed or deleted after `since`.
    ///
    /// Each live document is reported with its current predicate outcome.
    /// Fails with `CoreError::WatermarkExpired` when deletions after
    /// `since` can no longer be reported.
    fn scan_since(&self, predicate: &Predicate, since: Watermark) -> CoreResult<ChangeScan>;

    /// Returns the store's current change marker.
    fn current_watermark(&self) -> CoreResult<Watermark>;

    /// Reads the selected fields of a live document.
    ///
    /// Returns `None` if the document does not exist (anymore).
    fn fetch(&self, id: DocumentId, fields: &FieldSet) -> CoreResult<Option<DocumentSnapshot>>;
}
