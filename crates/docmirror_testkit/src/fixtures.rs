//! Person-document fixtures.
//!
//! Every fixture person has `Form = "Person"`, a `Lastname`, a
//! `Firstname` and a `City`. Lastnames are drawn round-robin from
//! [`LASTNAMES`], so the share starting with `L` is predictable.

use docmirror_core::{DocumentId, FieldSet, Fields, Predicate, Value};
use docmirror_store::MemoryDocumentStore;
use docmirror_targets::{SqliteTarget, SqliteTargetConfig};
use tempfile::TempDir;

/// Lastnames used by fixtures. Exactly one in eight starts with `L`.
pub const LASTNAMES: [&str; 8] = [
    "Lovelace", "Hopper", "Turing", "Knuth", "Dijkstra", "Ritchie", "Thompson", "Backus",
];

/// Cities used by fixtures.
pub const CITIES: [&str; 4] = ["London", "Paris", "Zurich", "Boston"];

/// Creates a person document.
pub fn person(firstname: &str, lastname: &str, city: &str) -> Fields {
    [
        ("Form".to_string(), Value::text("Person")),
        ("Firstname".to_string(), Value::text(firstname)),
        ("Lastname".to_string(), Value::text(lastname)),
        ("City".to_string(), Value::text(city)),
    ]
    .into()
}

/// Creates a non-person document that never matches person predicates.
pub fn memo(subject: &str) -> Fields {
    [
        ("Form".to_string(), Value::text("Memo")),
        ("Subject".to_string(), Value::text(subject)),
    ]
    .into()
}

/// `Form = "Person"`.
pub fn person_predicate() -> Predicate {
    Predicate::new(r#"Form = "Person""#)
}

/// `Form = "Person" & StartsWith(Lastname; "L")`.
pub fn l_predicate() -> Predicate {
    Predicate::new(r#"Form = "Person" & StartsWith(Lastname; "L")"#)
}

/// A store populated with persons and memos.
pub struct PeopleFixture {
    /// The store.
    pub store: MemoryDocumentStore,
    /// Person IDs in creation order.
    pub people: Vec<DocumentId>,
    /// Memo IDs in creation order.
    pub memos: Vec<DocumentId>,
}

impl PeopleFixture {
    /// Creates `people` persons and `memos` memos in a store named `"names"`.
    ///
    /// Person `i` gets `LASTNAMES[i % 8]`, so `people / 8` (rounded up)
    /// of them match [`l_predicate`].
    pub fn populate(people: usize, memos: usize) -> Self {
        let store = MemoryDocumentStore::new("names");
        let people = (0..people)
            .map(|i| {
                store.create(person(
                    &format!("First{i}"),
                    LASTNAMES[i % LASTNAMES.len()],
                    CITIES[i % CITIES.len()],
                ))
            })
            .collect();
        let memos = (0..memos)
            .map(|i| store.create(memo(&format!("Memo {i}"))))
            .collect();
        Self {
            store,
            people,
            memos,
        }
    }

    /// Person IDs whose lastname starts with `L`.
    pub fn l_people(&self) -> Vec<DocumentId> {
        self.people
            .iter()
            .enumerate()
            .filter(|(i, _)| LASTNAMES[i % LASTNAMES.len()].starts_with('L'))
            .map(|(_, id)| *id)
            .collect()
    }
}

/// A SQLite target in a temporary directory, removed on drop.
pub struct TempSqliteTarget {
    /// The target.
    pub target: SqliteTarget,
    _dir: TempDir,
}

impl TempSqliteTarget {
    /// Creates a file-backed target with table `people`.
    pub fn new(projection: FieldSet) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = SqliteTargetConfig::new(dir.path().join("target.db"), "people")
            .with_projection(projection);
        let target = SqliteTarget::open(config).expect("Failed to open SQLite target");
        Self { target, _dir: dir }
    }
}

impl std::ops::Deref for TempSqliteTarget {
    type Target = SqliteTarget;

    fn deref(&self) -> &Self::Target {
        &self.target
    }
}
