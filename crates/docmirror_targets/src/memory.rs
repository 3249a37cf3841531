//! Concurrent in-memory sync target with equality indexes.

use docmirror_core::{CoreResult, DocumentId, FieldSet, Fields, SyncTarget, Value, Version};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A materialized document.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEntry {
    /// Projected fields.
    pub fields: Fields,
    /// Version that produced the projection.
    pub version: Version,
}

/// Index key to document IDs, per indexed field.
type FieldIndex = HashMap<String, HashSet<DocumentId>>;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<DocumentId, TargetEntry>,
    indexes: HashMap<String, FieldIndex>,
}

impl Inner {
    fn index(&mut self, id: DocumentId, fields: &Fields) {
        for (field, index) in &mut self.indexes {
            if let Some(value) = fields.get(field) {
                for scalar in value.scalars() {
                    index.entry(scalar.index_key()).or_default().insert(id);
                }
            }
        }
    }

    fn unindex(&mut self, id: DocumentId, fields: &Fields) {
        for (field, index) in &mut self.indexes {
            if let Some(value) = fields.get(field) {
                for scalar in value.scalars() {
                    let key = scalar.index_key();
                    if let Some(ids) = index.get_mut(&key) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            index.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

/// An in-process collection of projections, safe to read while a pass
/// writes to it.
///
/// Every upsert and remove is visible immediately; the target is not
/// transactional, so the engine applies passes best-effort.
///
/// # Example
///
/// ```rust,ignore
/// let people = MemoryIndexTarget::new("people", FieldSet::named(["Lastname", "City"]))
///     .with_index("City");
/// engine.sync(&store, &Predicate::new("Form = \"Person\""), &people)?;
/// let in_paris = people.lookup("City", &Value::text("Paris"));
/// ```
#[derive(Debug)]
pub struct MemoryIndexTarget {
    target_id: String,
    projection: FieldSet,
    inner: RwLock<Inner>,
}

impl MemoryIndexTarget {
    /// Creates an empty target.
    pub fn new(target_id: impl Into<String>, projection: FieldSet) -> Self {
        Self {
            target_id: target_id.into(),
            projection,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Adds an equality index on a field, indexing existing entries.
    pub fn with_index(self, field: impl Into<String>) -> Self {
        self.add_index(field);
        self
    }

    /// Adds an equality index on a field. No-op if it already exists.
    pub fn add_index(&self, field: impl Into<String>) {
        let field = field.into();
        let mut inner = self.inner.write();
        if inner.indexes.contains_key(&field) {
            return;
        }
        let mut index = FieldIndex::new();
        for (id, entry) in &inner.entries {
            if let Some(value) = entry.fields.get(&field) {
                for scalar in value.scalars() {
                    index.entry(scalar.index_key()).or_default().insert(*id);
                }
            }
        }
        inner.indexes.insert(field, index);
    }

    /// Returns the names of indexed fields.
    pub fn indexed_fields(&self) -> BTreeSet<String> {
        self.inner.read().indexes.keys().cloned().collect()
    }

    /// Returns the entry for a document.
    pub fn get(&self, id: DocumentId) -> Option<TargetEntry> {
        self.inner.read().entries.get(&id).cloned()
    }

    /// Returns the IDs of documents whose field equals `value`, in ID order.
    ///
    /// For list-valued fields any element may match. Uses the field's index
    /// when one exists and scans all entries otherwise.
    pub fn lookup(&self, field: &str, value: &Value) -> Vec<DocumentId> {
        let inner = self.inner.read();
        let key = value.index_key();
        let mut ids: Vec<DocumentId> = match inner.indexes.get(field) {
            Some(index) => index
                .get(&key)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            None => inner
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .fields
                        .get(field)
                        .is_some_and(|v| v.scalars().any(|s| s.index_key() == key))
                })
                .map(|(id, _)| *id)
                .collect(),
        };
        ids.sort();
        ids
    }

    /// Number of materialized documents.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the target holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Removes every entry, keeping the index definitions.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        for index in inner.indexes.values_mut() {
            index.clear();
        }
    }
}

impl SyncTarget for MemoryIndexTarget {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn existing_ids(&self) -> CoreResult<HashSet<DocumentId>> {
        Ok(self.inner.read().entries.keys().copied().collect())
    }

    fn stored_version(&self, id: DocumentId) -> CoreResult<Option<Version>> {
        Ok(self.inner.read().entries.get(&id).map(|e| e.version))
    }

    fn projection_fields(&self) -> FieldSet {
        self.projection.clone()
    }

    fn upsert(&self, id: DocumentId, fields: &Fields, version: Version) -> CoreResult<()> {
        let fields = self.projection.project(fields);
        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(&id) {
            inner.unindex(id, &old.fields);
        }
        inner.index(id, &fields);
        inner.entries.insert(id, TargetEntry { fields, version });
        Ok(())
    }

    fn remove(&self, id: DocumentId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(&id) {
            inner.unindex(id, &old.fields);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(last: &str, city: &str) -> Fields {
        [
            ("Form".to_string(), Value::text("Person")),
            ("Lastname".to_string(), Value::text(last)),
            ("City".to_string(), Value::text(city)),
        ]
        .into()
    }

    fn target() -> MemoryIndexTarget {
        MemoryIndexTarget::new("people", FieldSet::named(["Lastname", "City"])).with_index("City")
    }

    #[test]
    fn upsert_projects_and_indexes() {
        let t = target();
        let id = DocumentId::new();
        t.upsert(id, &person("Lovelace", "London"), Version::new(1, 10))
            .unwrap();

        let entry = t.get(id).unwrap();
        assert!(!entry.fields.contains_key("Form"));
        assert_eq!(entry.version, Version::new(1, 10));
        assert_eq!(t.lookup("City", &Value::text("London")), vec![id]);
        assert_eq!(t.stored_version(id).unwrap(), Some(Version::new(1, 10)));
    }

    #[test]
    fn overwrite_moves_index_entries() {
        let t = target();
        let id = DocumentId::new();
        t.upsert(id, &person("Lovelace", "London"), Version::new(1, 10))
            .unwrap();
        t.upsert(id, &person("Lovelace", "Paris"), Version::new(2, 20))
            .unwrap();

        assert!(t.lookup("City", &Value::text("London")).is_empty());
        assert_eq!(t.lookup("City", &Value::text("Paris")), vec![id]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let t = target();
        let id = DocumentId::new();
        t.upsert(id, &person("Hopper", "NYC"), Version::new(1, 1))
            .unwrap();
        t.remove(id).unwrap();
        t.remove(id).unwrap();
        t.remove(DocumentId::new()).unwrap();
        assert!(t.is_empty());
        assert!(t.lookup("City", &Value::text("NYC")).is_empty());
    }

    #[test]
    fn lookup_without_index_scans() {
        let t = target();
        let a = DocumentId::new();
        t.upsert(a, &person("Lovelace", "London"), Version::new(1, 1))
            .unwrap();
        assert_eq!(t.lookup("Lastname", &Value::text("Lovelace")), vec![a]);
    }

    #[test]
    fn late_index_covers_existing_entries() {
        let t = target();
        let a = DocumentId::new();
        t.upsert(a, &person("Lovelace", "London"), Version::new(1, 1))
            .unwrap();
        t.add_index("Lastname");
        assert!(t.indexed_fields().contains("Lastname"));
        assert_eq!(t.lookup("Lastname", &Value::text("Lovelace")), vec![a]);
    }

    #[test]
    fn list_values_index_each_element() {
        let t = MemoryIndexTarget::new("tags", FieldSet::All).with_index("Tags");
        let id = DocumentId::new();
        let fields: Fields = [("Tags".to_string(), Value::from(vec!["red", "blue"]))].into();
        t.upsert(id, &fields, Version::new(1, 1)).unwrap();
        assert_eq!(t.lookup("Tags", &Value::text("blue")), vec![id]);
        assert_eq!(t.lookup("Tags", &Value::from(1i64)), Vec::<DocumentId>::new());
    }
}
