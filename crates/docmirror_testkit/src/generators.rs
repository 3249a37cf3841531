//! Property-based test generators using proptest.
//!
//! Mutations address existing documents by slot: slot `n` is the
//! `n % len`-th live document in ID order, so any generated sequence is
//! valid against any store state.

use crate::fixtures::{memo, person, CITIES, LASTNAMES};
use docmirror_core::{DocumentId, Predicate, Watermark};
use docmirror_store::MemoryDocumentStore;
use proptest::prelude::*;

/// One change to a store.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a person.
    CreatePerson {
        /// Index into `LASTNAMES`.
        lastname: usize,
        /// Index into `CITIES`.
        city: usize,
    },
    /// Create a memo.
    CreateMemo,
    /// Change a document's lastname.
    SetLastname {
        /// Document slot.
        slot: usize,
        /// Index into `LASTNAMES`.
        lastname: usize,
    },
    /// Turn a document into a memo or back into a person.
    ToggleForm {
        /// Document slot.
        slot: usize,
    },
    /// Save a document without changing it.
    Touch {
        /// Document slot.
        slot: usize,
    },
    /// Delete a document.
    Delete {
        /// Document slot.
        slot: usize,
    },
    /// Purge every tombstone written so far.
    PurgeTombstones,
}

/// Strategy for generating a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        4 => (0..LASTNAMES.len(), 0..CITIES.len())
            .prop_map(|(lastname, city)| Mutation::CreatePerson { lastname, city }),
        1 => Just(Mutation::CreateMemo),
        3 => (any::<usize>(), 0..LASTNAMES.len())
            .prop_map(|(slot, lastname)| Mutation::SetLastname { slot, lastname }),
        1 => any::<usize>().prop_map(|slot| Mutation::ToggleForm { slot }),
        1 => any::<usize>().prop_map(|slot| Mutation::Touch { slot }),
        2 => any::<usize>().prop_map(|slot| Mutation::Delete { slot }),
        1 => Just(Mutation::PurgeTombstones),
    ]
}

/// Strategy for generating a sequence of mutations.
pub fn mutation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Predicates over fixture persons, from wide to narrow.
pub const PREDICATES: [&str; 6] = [
    "@All",
    r#"Form = "Person""#,
    r#"Form = "Person" & StartsWith(Lastname; "L")"#,
    r#"Form = "Person" & (City = "London" | City = "Paris")"#,
    r#"!(Form = "Person")"#,
    r#"Lastname = "Hopper" : "Turing""#,
];

/// Strategy for picking one of [`PREDICATES`].
pub fn predicate_strategy() -> impl Strategy<Value = Predicate> {
    prop::sample::select(PREDICATES.to_vec()).prop_map(Predicate::new)
}

/// One step of a randomized sync scenario: mutate, then sync with a predicate.
#[derive(Debug, Clone)]
pub struct SyncRound {
    /// Changes applied before the pass.
    pub mutations: Vec<Mutation>,
    /// Predicate for the pass.
    pub predicate: Predicate,
}

/// Strategy for generating a sequence of sync rounds.
pub fn sync_rounds_strategy(max_rounds: usize) -> impl Strategy<Value = Vec<SyncRound>> {
    prop::collection::vec(
        (mutation_sequence_strategy(0, 12), predicate_strategy())
            .prop_map(|(mutations, predicate)| SyncRound {
                mutations,
                predicate,
            }),
        1..max_rounds,
    )
}

fn pick(store: &MemoryDocumentStore, slot: usize) -> Option<DocumentId> {
    let mut ids = store.ids();
    if ids.is_empty() {
        return None;
    }
    ids.sort();
    Some(ids[slot % ids.len()])
}

/// Applies a mutation. Mutations addressing an empty store are skipped.
pub fn apply_mutation(store: &MemoryDocumentStore, mutation: &Mutation) {
    match *mutation {
        Mutation::CreatePerson { lastname, city } => {
            store.create(person("Gen", LASTNAMES[lastname], CITIES[city]));
        }
        Mutation::CreateMemo => {
            store.create(memo("generated"));
        }
        Mutation::SetLastname { slot, lastname } => {
            if let Some(id) = pick(store, slot) {
                store
                    .set_field(id, "Lastname", LASTNAMES[lastname])
                    .expect("picked document exists");
            }
        }
        Mutation::ToggleForm { slot } => {
            if let Some(id) = pick(store, slot) {
                store
                    .update(id, |fields| {
                        let is_person = fields
                            .get("Form")
                            .and_then(|v| v.as_text())
                            .is_some_and(|f| f == "Person");
                        let form = if is_person { "Memo" } else { "Person" };
                        fields.insert("Form".into(), form.into());
                    })
                    .expect("picked document exists");
            }
        }
        Mutation::Touch { slot } => {
            if let Some(id) = pick(store, slot) {
                store.touch(id).expect("picked document exists");
            }
        }
        Mutation::Delete { slot } => {
            if let Some(id) = pick(store, slot) {
                store.delete(id).expect("picked document exists");
            }
        }
        Mutation::PurgeTombstones => {
            let now = docmirror_core::DocumentStore::current_watermark(store)
                .unwrap_or(Watermark::ORIGIN);
            store.purge_tombstones(now);
        }
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
