//! Closure-invariant checks: a target holds exactly the matching IDs.

use docmirror_core::{CoreResult, DocumentId, DocumentStore, Predicate, SyncTarget};
use std::collections::BTreeSet;

/// Difference between the matching set and a target's ID set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosureReport {
    /// Matching documents the target lacks.
    pub missing: BTreeSet<DocumentId>,
    /// Target entries that do not match.
    pub extra: BTreeSet<DocumentId>,
}

impl ClosureReport {
    /// Returns true if the target holds exactly the matching IDs.
    pub fn is_closed(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Compares `store.evaluate_all(predicate)` with `target.existing_ids()`.
pub fn check_closure<D, T>(store: &D, predicate: &Predicate, target: &T) -> CoreResult<ClosureReport>
where
    D: DocumentStore + ?Sized,
    T: SyncTarget + ?Sized,
{
    let matching = store.evaluate_all(predicate)?;
    let held = target.existing_ids()?;
    Ok(ClosureReport {
        missing: matching.difference(&held).copied().collect(),
        extra: held.difference(&matching).copied().collect(),
    })
}

/// Panics unless the target holds exactly the matching IDs.
pub fn assert_closed<D, T>(store: &D, predicate: &Predicate, target: &T)
where
    D: DocumentStore + ?Sized,
    T: SyncTarget + ?Sized,
{
    let report = check_closure(store, predicate, target).expect("closure check failed");
    assert!(
        report.is_closed(),
        "target {} out of sync for {predicate}: {} missing, {} extra",
        target.target_id(),
        report.missing.len(),
        report.extra.len()
    );
}
