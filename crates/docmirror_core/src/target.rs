//! Sync Target SPI implemented by sink adapters.

use crate::error::CoreResult;
use crate::id::DocumentId;
use crate::types::Version;
use crate::value::{FieldSet, Fields};
use std::collections::HashSet;

/// A secondary store kept consistent with a predicate's result set.
///
/// The engine drives every sink through this contract only. Sinks use
/// interior mutability; all methods take `&self`.
///
/// # Contract
///
/// - `existing_ids` reflects committed state only
/// - `upsert` creates or overwrites and is idempotent
/// - `remove` is idempotent; removing an absent ID is not an error
/// - building a projection from raw fields is the sink's job
pub trait SyncTarget: Send + Sync {
    /// Stable identity of the sink, used to key persisted sync state.
    fn target_id(&self) -> &str;

    /// Returns the IDs of every document currently materialized.
    fn existing_ids(&self) -> CoreResult<HashSet<DocumentId>>;

    /// Returns the version stamp stored with a document, if present.
    fn stored_version(&self, id: DocumentId) -> CoreResult<Option<Version>>;

    /// Declares which document fields the store should hand over.
    fn projection_fields(&self) -> FieldSet;

    /// Creates or overwrites the entry for a document.
    fn upsert(&self, id: DocumentId, fields: &Fields, version: Version) -> CoreResult<()>;

    /// Removes the entry for a document.
    fn remove(&self, id: DocumentId) -> CoreResult<()>;

    /// Returns true if the sink applies a pass as one atomic batch.
    fn is_transactional(&self) -> bool {
        false
    }

    /// Opens a batch. Only called on transactional sinks.
    fn begin_batch(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Commits the open batch.
    fn commit_batch(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Discards the open batch.
    fn rollback_batch(&self) -> CoreResult<()> {
        Ok(())
    }
}
