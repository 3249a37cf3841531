//! In-memory versioned document store.

use crate::formula::Formula;
use docmirror_core::{
    ChangeEntry, ChangeScan, CoreError, CoreResult, DocumentId, DocumentSnapshot, DocumentStore,
    FieldSet, Fields, Predicate, Value, Version, Watermark,
};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A live document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    pub fields: Fields,
    pub version: Version,
    /// Change counter value of the last modification.
    pub changed_at: u64,
}

/// Deletion stub kept so change scans can report removals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Tombstone {
    pub version: Version,
    pub deleted_at: u64,
}

/// Mutable state behind the store lock.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub documents: HashMap<DocumentId, StoredDocument>,
    pub tombstones: HashMap<DocumentId, Tombstone>,
    /// Incremented on every create, update and delete.
    pub change_counter: u64,
    /// Tombstones at or below this counter value were purged.
    pub purge_horizon: u64,
    /// Last sequence time handed out (µs since epoch).
    pub last_time: u64,
}

impl StoreState {
    fn next_change(&mut self) -> u64 {
        self.change_counter += 1;
        self.change_counter
    }

    /// Wall-clock microseconds, forced strictly increasing.
    fn next_time(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        self.last_time = now.max(self.last_time + 1);
        self.last_time
    }

    /// Sequence number the next revision of `id` gets.
    fn next_sequence(&self, id: &DocumentId) -> u32 {
        let current = self
            .documents
            .get(id)
            .map(|d| d.version.sequence)
            .or_else(|| self.tombstones.get(id).map(|t| t.version.sequence));
        current.map_or(1, |seq| seq.saturating_add(1))
    }
}

/// An in-memory document store with a change log.
///
/// Every write bumps the store-wide change counter, which doubles as the
/// watermark, and the written document's `Version`. Deletions leave a
/// tombstone until purged.
///
/// # Thread Safety
///
/// All methods take `&self`; one `RwLock` guards the document map, so
/// readers see a consistent view for the whole of a scan.
///
/// # Example
///
/// ```
/// use docmirror_core::{DocumentStore, Predicate, Value};
/// use docmirror_store::MemoryDocumentStore;
///
/// let store = MemoryDocumentStore::new("names");
/// let id = store.create([("Form".to_string(), Value::text("Person"))].into());
/// let hits = store.evaluate_all(&Predicate::new(r#"Form = "Person""#)).unwrap();
/// assert!(hits.contains(&id));
/// ```
pub struct MemoryDocumentStore {
    store_id: String,
    pub(crate) state: RwLock<StoreState>,
    formulas: RwLock<HashMap<String, Arc<Formula>>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    pub fn new(store_id: impl Into<String>) -> Self {
        Self::with_state(store_id, StoreState::default())
    }

    pub(crate) fn with_state(store_id: impl Into<String>, state: StoreState) -> Self {
        Self {
            store_id: store_id.into(),
            state: RwLock::new(state),
            formulas: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a document with a fresh ID.
    pub fn create(&self, fields: Fields) -> DocumentId {
        let id = DocumentId::new();
        self.put(id, fields);
        id
    }

    /// Creates or replaces a document under a given ID.
    ///
    /// Re-creating a deleted ID clears its tombstone and continues its
    /// sequence numbering.
    pub fn put(&self, id: DocumentId, fields: Fields) -> Version {
        let mut state = self.state.write();
        let version = Version::new(state.next_sequence(&id), state.next_time());
        let changed_at = state.next_change();
        state.tombstones.remove(&id);
        state.documents.insert(
            id,
            StoredDocument {
                fields,
                version,
                changed_at,
            },
        );
        version
    }

    /// Modifies a document in place and saves a new revision.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DocumentNotFound` if the document does not exist.
    pub fn update<F>(&self, id: DocumentId, f: F) -> CoreResult<Version>
    where
        F: FnOnce(&mut Fields),
    {
        let mut state = self.state.write();
        if !state.documents.contains_key(&id) {
            return Err(CoreError::DocumentNotFound(id));
        }
        let sequence = state.next_sequence(&id);
        let time = state.next_time();
        let changed_at = state.next_change();
        let doc = state
            .documents
            .get_mut(&id)
            .ok_or(CoreError::DocumentNotFound(id))?;
        f(&mut doc.fields);
        doc.version = Version::new(sequence, time);
        doc.changed_at = changed_at;
        Ok(doc.version)
    }

    /// Sets a single field and saves a new revision.
    pub fn set_field(
        &self,
        id: DocumentId,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<Version> {
        let name = name.into();
        let value = value.into();
        self.update(id, move |fields| {
            fields.insert(name, value);
        })
    }

    /// Saves a new revision without changing any field.
    pub fn touch(&self, id: DocumentId) -> CoreResult<Version> {
        self.update(id, |_| {})
    }

    /// Deletes a document, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DocumentNotFound` if the document does not exist.
    pub fn delete(&self, id: DocumentId) -> CoreResult<Version> {
        let mut state = self.state.write();
        let doc = state
            .documents
            .remove(&id)
            .ok_or(CoreError::DocumentNotFound(id))?;
        let version = Version::new(doc.version.sequence.saturating_add(1), state.next_time());
        let deleted_at = state.next_change();
        state
            .tombstones
            .insert(id, Tombstone { version, deleted_at });
        Ok(version)
    }

    /// Returns a document's current fields and version.
    #[must_use]
    pub fn get(&self, id: DocumentId) -> Option<DocumentSnapshot> {
        self.state.read().documents.get(&id).map(|d| DocumentSnapshot {
            version: d.version,
            fields: d.fields.clone(),
        })
    }

    /// Returns all live document IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<DocumentId> {
        self.state.read().documents.keys().copied().collect()
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Returns true if the store holds no live documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of retained tombstones.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.state.read().tombstones.len()
    }

    /// Drops tombstones written at or before `up_to`.
    ///
    /// Afterwards, change scans from watermarks older than `up_to` fail
    /// with `CoreError::WatermarkExpired`. Returns the number purged.
    pub fn purge_tombstones(&self, up_to: Watermark) -> usize {
        let mut state = self.state.write();
        let before = state.tombstones.len();
        state
            .tombstones
            .retain(|_, t| t.deleted_at > up_to.as_u64());
        state.purge_horizon = state.purge_horizon.max(up_to.as_u64());
        let purged = before - state.tombstones.len();
        debug!(store = %self.store_id, purged, horizon = state.purge_horizon, "purged tombstones");
        purged
    }

    /// Compiles a predicate, reusing earlier compilations of the same text.
    pub fn compile(&self, predicate: &Predicate) -> CoreResult<Arc<Formula>> {
        if let Some(formula) = self.formulas.read().get(predicate.text()) {
            return Ok(Arc::clone(formula));
        }
        let formula = Arc::new(Formula::compile(predicate.text())?);
        self.formulas
            .write()
            .insert(predicate.text().to_string(), Arc::clone(&formula));
        Ok(formula)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn store_id(&self) -> &str {
        &self.store_id
    }

    fn evaluate_all(&self, predicate: &Predicate) -> CoreResult<HashSet<DocumentId>> {
        let formula = self.compile(predicate)?;
        let state = self.state.read();
        Ok(state
            .documents
            .par_iter()
            .filter(|(_, doc)| formula.matches(&doc.fields))
            .map(|(id, _)| *id)
            .collect())
    }

    fn scan_since(&self, predicate: &Predicate, since: Watermark) -> CoreResult<ChangeScan> {
        let formula = self.compile(predicate)?;
        let state = self.state.read();

        if since.as_u64() < state.purge_horizon {
            return Err(CoreError::WatermarkExpired {
                requested: since.as_u64(),
                horizon: state.purge_horizon,
            });
        }

        let mut stamped: Vec<(u64, ChangeEntry)> = state
            .documents
            .par_iter()
            .filter(|(_, doc)| doc.changed_at > since.as_u64())
            .map(|(id, doc)| {
                let entry = if formula.matches(&doc.fields) {
                    ChangeEntry::matched(*id, doc.version)
                } else {
                    ChangeEntry::unmatched(*id, doc.version)
                };
                (doc.changed_at, entry)
            })
            .collect();

        stamped.extend(
            state
                .tombstones
                .iter()
                .filter(|(_, t)| t.deleted_at > since.as_u64())
                .map(|(id, t)| (t.deleted_at, ChangeEntry::deleted(*id, t.version))),
        );
        stamped.sort_by_key(|(stamp, _)| *stamp);

        Ok(ChangeScan {
            entries: stamped.into_iter().map(|(_, entry)| entry).collect(),
            watermark: Watermark::new(state.change_counter),
        })
    }

    fn current_watermark(&self) -> CoreResult<Watermark> {
        Ok(Watermark::new(self.state.read().change_counter))
    }

    fn fetch(&self, id: DocumentId, fields: &FieldSet) -> CoreResult<Option<DocumentSnapshot>> {
        Ok(self.state.read().documents.get(&id).map(|doc| DocumentSnapshot {
            version: doc.version,
            fields: fields.project(&doc.fields),
        }))
    }
}
