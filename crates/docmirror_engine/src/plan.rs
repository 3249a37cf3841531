//! Scan phase: mode selection and delta computation.

use crate::apply::Operation;
use crate::error::{EngineResult, SyncError};
use docmirror_core::{
    ChangeEntry, ChangeStatus, DocumentId, DocumentStore, Fingerprint, Predicate, SyncState,
    SyncTarget, Version, Watermark,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// How a pass computes its delta. Chosen once per pass, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScanMode {
    /// Diff the full match set against the full target set.
    FullReconciliation,
    /// Walk the documents changed since a watermark.
    Incremental {
        /// Watermark the scan started from.
        since: Watermark,
    },
}

impl ScanMode {
    /// Returns true for full reconciliation.
    pub fn is_full(&self) -> bool {
        matches!(self, ScanMode::FullReconciliation)
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::FullReconciliation => f.write_str("full reconciliation"),
            ScanMode::Incremental { since } => write!(f, "incremental since {since}"),
        }
    }
}

/// Picks the scan mode from the prior state and the current fingerprint.
pub(crate) fn select_mode(prior: Option<&SyncState>, fingerprint: &Fingerprint) -> ScanMode {
    match prior {
        Some(state) if state.fingerprint == *fingerprint => ScanMode::Incremental {
            since: state.watermark,
        },
        _ => ScanMode::FullReconciliation,
    }
}

/// One operation the apply phase has to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedOp {
    pub id: DocumentId,
    pub operation: Operation,
    /// Version currently stored in the target, known for updates only.
    pub stored: Option<Version>,
}

/// Diagnostic counts of what the scan observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ScanCounters {
    pub matched: u64,
    pub unmatched: u64,
    pub deleted: u64,
}

/// Output of the scan phase.
#[derive(Debug)]
pub(crate) struct DeltaPlan {
    pub mode: ScanMode,
    /// Removes first, then updates, then adds; each group in ID order.
    pub ops: Vec<PlannedOp>,
    pub counters: ScanCounters,
    pub next_watermark: Watermark,
}

impl DeltaPlan {
    fn new(mode: ScanMode, next_watermark: Watermark) -> Self {
        Self {
            mode,
            ops: Vec::new(),
            counters: ScanCounters::default(),
            next_watermark,
        }
    }

    fn push_sorted(&mut self, mut ops: Vec<PlannedOp>) {
        ops.sort_by_key(|op| op.id);
        self.ops.extend(ops);
    }
}

/// Computes the delta by diffing the whole match set against the target.
///
/// The watermark is taken before the evaluation, so a document changed
/// while the evaluation runs is seen again by the next incremental pass.
pub(crate) fn full_reconciliation<D>(
    store: &D,
    predicate: &Predicate,
    existing: &HashSet<DocumentId>,
) -> EngineResult<DeltaPlan>
where
    D: DocumentStore + ?Sized,
{
    let watermark = store.current_watermark().map_err(SyncError::from_store)?;
    let matching = store
        .evaluate_all(predicate)
        .map_err(SyncError::from_store)?;

    let mut plan = DeltaPlan::new(ScanMode::FullReconciliation, watermark);

    let removes: Vec<PlannedOp> = existing
        .difference(&matching)
        .map(|&id| PlannedOp {
            id,
            operation: Operation::Remove,
            stored: None,
        })
        .collect();
    let adds: Vec<PlannedOp> = matching
        .difference(existing)
        .map(|&id| PlannedOp {
            id,
            operation: Operation::Add,
            stored: None,
        })
        .collect();

    plan.counters = ScanCounters {
        matched: matching.len() as u64,
        unmatched: removes.len() as u64,
        deleted: 0,
    };
    plan.push_sorted(removes);
    plan.push_sorted(adds);

    debug!(
        matching = matching.len(),
        existing = existing.len(),
        to_remove = plan.counters.unmatched,
        "full reconciliation computed"
    );
    Ok(plan)
}

/// Computes the delta from the documents changed since `since`.
///
/// Fails with `SyncError::Scan(CoreError::WatermarkExpired)` when the
/// store can no longer answer for `since`; the caller falls back to full
/// reconciliation.
pub(crate) fn incremental<D, T>(
    store: &D,
    predicate: &Predicate,
    since: Watermark,
    existing: &HashSet<DocumentId>,
    target: &T,
) -> EngineResult<DeltaPlan>
where
    D: DocumentStore + ?Sized,
    T: SyncTarget + ?Sized,
{
    let scan = store
        .scan_since(predicate, since)
        .map_err(SyncError::from_store)?;

    let mut plan = DeltaPlan::new(ScanMode::Incremental { since }, scan.watermark);
    let mut removes = Vec::new();
    let mut updates = Vec::new();
    let mut adds = Vec::new();

    for entry in latest_per_document(scan.entries) {
        match entry.status {
            ChangeStatus::Matched => plan.counters.matched += 1,
            ChangeStatus::Unmatched => plan.counters.unmatched += 1,
            ChangeStatus::Deleted => plan.counters.deleted += 1,
        }

        let present = existing.contains(&entry.id);
        match (entry.status, present) {
            (ChangeStatus::Matched, false) => adds.push(PlannedOp {
                id: entry.id,
                operation: Operation::Add,
                stored: None,
            }),
            (ChangeStatus::Matched, true) => {
                let stored = target
                    .stored_version(entry.id)
                    .map_err(SyncError::TargetRead)?;
                match stored {
                    Some(stored) if stored == entry.version => {}
                    Some(stored) if stored.is_newer_than(&entry.version) => {
                        warn!(
                            id = %entry.id,
                            %stored,
                            live = %entry.version,
                            "target holds a newer version than the store, skipping"
                        );
                    }
                    _ => updates.push(PlannedOp {
                        id: entry.id,
                        operation: Operation::Update,
                        stored,
                    }),
                }
            }
            (ChangeStatus::Unmatched | ChangeStatus::Deleted, true) => removes.push(PlannedOp {
                id: entry.id,
                operation: Operation::Remove,
                stored: None,
            }),
            (ChangeStatus::Unmatched | ChangeStatus::Deleted, false) => {}
        }
    }

    plan.push_sorted(removes);
    plan.push_sorted(updates);
    plan.push_sorted(adds);

    debug!(
        %since,
        next = %plan.next_watermark,
        matched = plan.counters.matched,
        unmatched = plan.counters.unmatched,
        deleted = plan.counters.deleted,
        "incremental scan computed"
    );
    Ok(plan)
}

/// Collapses repeated entries for one document to the one with the highest
/// version. On equal versions the later entry wins.
fn latest_per_document(entries: Vec<ChangeEntry>) -> Vec<ChangeEntry> {
    let mut latest: HashMap<DocumentId, ChangeEntry> = HashMap::with_capacity(entries.len());
    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        match latest.get_mut(&entry.id) {
            Some(seen) => {
                if !seen.version.is_newer_than(&entry.version) {
                    *seen = entry;
                }
            }
            None => {
                order.push(entry.id);
                latest.insert(entry.id, entry);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect()
}
