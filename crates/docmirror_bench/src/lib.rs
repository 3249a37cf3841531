//! Benchmark utilities.

use docmirror_core::DocumentId;
use docmirror_store::MemoryDocumentStore;
use docmirror_testkit::{CITIES, LASTNAMES};
use rand::seq::SliceRandom;
use rand::Rng;

/// Store sizes used across benchmarks.
pub const STORE_SIZES: [usize; 3] = [1_000, 10_000, 50_000];

/// Pick `count` random documents and give each a random city.
pub fn mutate_random(store: &MemoryDocumentStore, ids: &[DocumentId], count: usize) {
    let mut rng = rand::thread_rng();
    for id in ids.choose_multiple(&mut rng, count) {
        let city = CITIES[rng.gen_range(0..CITIES.len())];
        // Benchmarks never delete, so every id is live.
        let _ = store.set_field(*id, "City", city);
    }
}

/// Rename `count` random documents to a random fixture lastname, moving
/// some of them in or out of lastname-prefix predicates.
pub fn rename_random(store: &MemoryDocumentStore, ids: &[DocumentId], count: usize) {
    let mut rng = rand::thread_rng();
    for id in ids.choose_multiple(&mut rng, count) {
        let lastname = LASTNAMES[rng.gen_range(0..LASTNAMES.len())];
        let _ = store.set_field(*id, "Lastname", lastname);
    }
}
