//! The sync engine.

use crate::apply::{self, ApplyFailure, Operation, PreparedOp};
use crate::config::{CancelToken, PassContext, PassOptions, SyncConfig};
use crate::error::{EngineResult, SyncError};
use crate::exclusive::{self, PassRegistry};
use crate::plan::{self, DeltaPlan, ScanMode};
use docmirror_core::{
    CoreError, DocumentStore, FieldSet, PairKey, Predicate, SyncState, SyncStateStore,
    SyncTarget, Watermark,
};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Cumulative statistics over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that returned `Ok`.
    pub passes_completed: u64,
    /// Passes that returned an error.
    pub passes_failed: u64,
    /// Completed passes that ran a full reconciliation.
    pub full_reconciliations: u64,
    /// Completed passes that ran an incremental scan.
    pub incremental_scans: u64,
    /// Total documents added to targets.
    pub documents_added: u64,
    /// Total documents updated in targets.
    pub documents_updated: u64,
    /// Total documents removed from targets.
    pub documents_removed: u64,
    /// Total operations rejected by non-transactional targets.
    pub apply_failures: u64,
    /// End of the last completed pass.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one sync pass.
///
/// `added`, `updated` and `removed` count operations the target accepted.
/// `matched_scan`, `unmatched_scan` and `deleted_scan` describe what the
/// scan observed and are independent of what was applied:
///
/// - incremental scan: change entries by status, after collapsing
///   duplicates
/// - full reconciliation: `matched_scan` is the size of the full match
///   set, `unmatched_scan` the number of target entries that no longer
///   match, `deleted_scan` is zero
///
/// Equality ignores `duration`: two passes that computed and applied the
/// same delta compare equal however long each took.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// How the delta was computed.
    pub mode: ScanMode,
    /// Documents added to the target.
    pub added: u64,
    /// Documents overwritten in the target.
    pub updated: u64,
    /// Documents removed from the target.
    pub removed: u64,
    /// Matching documents the scan observed.
    pub matched_scan: u64,
    /// Non-matching documents the scan observed.
    pub unmatched_scan: u64,
    /// Deletions the scan observed.
    pub deleted_scan: u64,
    /// Watermark the pass started from; `None` on the first pass.
    pub previous_watermark: Option<Watermark>,
    /// Watermark this pass covers.
    pub next_watermark: Watermark,
    /// Operations the target rejected (non-transactional targets only).
    pub failures: Vec<ApplyFailure>,
    /// Whether the watermark and fingerprint were persisted.
    pub state_advanced: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl PartialEq for SyncResult {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.added == other.added
            && self.updated == other.updated
            && self.removed == other.removed
            && self.matched_scan == other.matched_scan
            && self.unmatched_scan == other.unmatched_scan
            && self.deleted_scan == other.deleted_scan
            && self.previous_watermark == other.previous_watermark
            && self.next_watermark == other.next_watermark
            && self.failures == other.failures
            && self.state_advanced == other.state_advanced
    }
}

impl Eq for SyncResult {}

impl SyncResult {
    /// Returns true if the pass changed nothing in the target.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }

    /// Total operations committed to the target.
    pub fn applied(&self) -> u64 {
        self.added + self.updated + self.removed
    }
}

/// Keeps targets consistent with the documents a predicate selects.
///
/// One engine can serve any number of (store, target) pairs. Passes for
/// the same pair are serialized through the engine's `PassRegistry` and,
/// across processes, through the state store's pair lease; passes for
/// different pairs run concurrently.
pub struct SyncEngine<S: SyncStateStore> {
    config: SyncConfig,
    state_store: Arc<S>,
    registry: Arc<PassRegistry>,
    pool: rayon::ThreadPool,
    stats: RwLock<SyncStats>,
    cancel: CancelToken,
}

impl<S: SyncStateStore> SyncEngine<S> {
    /// Creates a new sync engine with its own pass registry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the configuration is invalid or the
    /// fetch pool cannot be started.
    pub fn new(config: SyncConfig, state_store: S) -> EngineResult<Self> {
        Self::with_registry(config, Arc::new(state_store), Arc::new(PassRegistry::new()))
    }

    /// Creates an engine that shares a state store and pass registry with
    /// other engines.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` if the configuration is invalid or the
    /// fetch pool cannot be started.
    pub fn with_registry(
        config: SyncConfig,
        state_store: Arc<S>,
        registry: Arc<PassRegistry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("docmirror-fetch-{i}"));
        if let Some(workers) = config.fetch_workers {
            builder = builder.num_threads(workers);
        }
        let pool = builder
            .build()
            .map_err(|e| SyncError::Config(format!("fetch pool: {e}")))?;

        Ok(Self {
            config,
            state_store,
            registry,
            pool,
            stats: RwLock::new(SyncStats::default()),
            cancel: CancelToken::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the state store.
    pub fn state_store(&self) -> &S {
        &self.state_store
    }

    /// Returns the pass registry.
    pub fn registry(&self) -> &Arc<PassRegistry> {
        &self.registry
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels every pass currently running on this engine, and every
    /// pass started before `reset_cancel` is called.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancel.reset();
    }

    /// Loads the persisted state for a pair.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::StateLoad` if the state store fails.
    pub fn state_for(&self, store_id: &str, target_id: &str) -> EngineResult<Option<SyncState>> {
        self.state_store
            .load(&PairKey::new(store_id, target_id))
            .map_err(SyncError::StateLoad)
    }

    /// Forgets the state for a pair so the next pass runs a full
    /// reconciliation. Waits for (or rejects on) a running pass like `sync`.
    ///
    /// # Errors
    ///
    /// Returns the contention errors of `sync`, or `SyncError::StateLoad`
    /// if the state store fails.
    pub fn reset(&self, store_id: &str, target_id: &str) -> EngineResult<()> {
        let key = PairKey::new(store_id, target_id);
        let ctx = self.context(&PassOptions::default());
        let _claim = exclusive::claim(
            &self.registry,
            self.state_store.as_ref(),
            &key,
            self.config.concurrent_pass,
            &ctx,
        )?;
        self.state_store.clear(&key).map_err(SyncError::StateLoad)?;
        info!(pair = %key, "sync state reset");
        Ok(())
    }

    /// Runs one sync pass with default options.
    ///
    /// # Errors
    ///
    /// See `SyncError`. On any error other than `StateNotAdvanced` the
    /// persisted state is unchanged.
    pub fn sync<D, T>(&self, store: &D, predicate: &Predicate, target: &T) -> EngineResult<SyncResult>
    where
        D: DocumentStore + ?Sized,
        T: SyncTarget + ?Sized,
    {
        self.sync_with(store, predicate, target, &PassOptions::default())
    }

    /// Runs one sync pass.
    ///
    /// # Errors
    ///
    /// See `SyncError`. On any error other than `StateNotAdvanced` the
    /// persisted state is unchanged.
    pub fn sync_with<D, T>(
        &self,
        store: &D,
        predicate: &Predicate,
        target: &T,
        options: &PassOptions,
    ) -> EngineResult<SyncResult>
    where
        D: DocumentStore + ?Sized,
        T: SyncTarget + ?Sized,
    {
        let start = Instant::now();
        let key = PairKey::new(store.store_id(), target.target_id());
        let span = info_span!("sync_pass", pair = %key);
        let _enter = span.enter();

        let ctx = self.context(options);
        let outcome = exclusive::claim(
            &self.registry,
            self.state_store.as_ref(),
            &key,
            self.config.concurrent_pass,
            &ctx,
        )
        .and_then(|_claim| self.run_pass(&key, store, predicate, target, &ctx, start));

        match &outcome {
            Ok(result) => self.record_success(result),
            Err(err) => self.record_failure(err),
        }
        outcome
    }

    fn context(&self, options: &PassOptions) -> PassContext {
        PassContext::new(options.timeout.or(self.config.timeout), options.cancel.clone())
            .cancelled_by(self.cancel.clone())
    }

    fn run_pass<D, T>(
        &self,
        key: &PairKey,
        store: &D,
        predicate: &Predicate,
        target: &T,
        ctx: &PassContext,
        start: Instant,
    ) -> EngineResult<SyncResult>
    where
        D: DocumentStore + ?Sized,
        T: SyncTarget + ?Sized,
    {
        let prior = self.state_store.load(key).map_err(SyncError::StateLoad)?;
        let fingerprint = predicate.fingerprint();
        let mode = plan::select_mode(prior.as_ref(), &fingerprint);
        info!(%mode, predicate = %predicate, "pass started");

        let existing = target.existing_ids().map_err(SyncError::TargetRead)?;
        ctx.check()?;

        let plan = match mode {
            ScanMode::FullReconciliation => plan::full_reconciliation(store, predicate, &existing)?,
            ScanMode::Incremental { since } => {
                match plan::incremental(store, predicate, since, &existing, target) {
                    Err(SyncError::Scan(CoreError::WatermarkExpired { requested, horizon })) => {
                        warn!(
                            requested,
                            horizon, "watermark older than purge horizon, reconciling fully"
                        );
                        plan::full_reconciliation(store, predicate, &existing)?
                    }
                    other => other?,
                }
            }
        };
        ctx.check()?;

        let prepared = self.prepare(store, &plan, &target.projection_fields(), ctx)?;
        ctx.check()?;

        let outcome = apply::apply(target, &prepared, ctx, self.config.transactional_retries)?;

        let mut result = SyncResult {
            mode: plan.mode,
            added: outcome.added,
            updated: outcome.updated,
            removed: outcome.removed,
            matched_scan: plan.counters.matched,
            unmatched_scan: plan.counters.unmatched,
            deleted_scan: plan.counters.deleted,
            previous_watermark: prior.as_ref().map(|s| s.watermark),
            next_watermark: plan.next_watermark,
            failures: outcome.failures,
            state_advanced: false,
            duration: Duration::ZERO,
        };

        if result.failures.is_empty() || self.config.advance_on_partial_failure {
            let state = SyncState {
                watermark: plan.next_watermark,
                fingerprint,
            };
            if let Err(source) = self.state_store.save(key, &state) {
                result.duration = start.elapsed();
                warn!(error = %source, "delta applied but sync state not saved");
                return Err(SyncError::StateNotAdvanced {
                    result: Box::new(result),
                    source,
                });
            }
            result.state_advanced = true;
        } else {
            warn!(
                failures = result.failures.len(),
                "operations failed, sync state not advanced"
            );
        }

        result.duration = start.elapsed();
        info!(
            added = result.added,
            updated = result.updated,
            removed = result.removed,
            matched_scan = result.matched_scan,
            unmatched_scan = result.unmatched_scan,
            deleted_scan = result.deleted_scan,
            next = %result.next_watermark,
            advanced = result.state_advanced,
            elapsed_ms = result.duration.as_millis() as u64,
            "pass finished"
        );
        Ok(result)
    }

    /// Fetches the projections for every add and update on the fetch pool.
    ///
    /// Documents that vanished since the scan are dropped; the next pass
    /// sees their tombstones. An update whose fetched version is not newer
    /// than the stored one is dropped too.
    fn prepare<D>(
        &self,
        store: &D,
        plan: &DeltaPlan,
        fields: &FieldSet,
        ctx: &PassContext,
    ) -> EngineResult<Vec<PreparedOp>>
    where
        D: DocumentStore + ?Sized,
    {
        let prepared = self.pool.install(|| {
            plan.ops
                .par_iter()
                .map(|op| -> EngineResult<Option<PreparedOp>> {
                    if op.operation == Operation::Remove {
                        return Ok(Some(PreparedOp::Remove { id: op.id }));
                    }
                    ctx.check()?;
                    let Some(snapshot) = store.fetch(op.id, fields).map_err(SyncError::Scan)?
                    else {
                        debug!(id = %op.id, "document vanished before fetch");
                        return Ok(None);
                    };
                    if let Some(stored) = op.stored {
                        if !snapshot.version.is_newer_than(&stored) {
                            debug!(id = %op.id, %stored, "fetched version not newer, skipping");
                            return Ok(None);
                        }
                    }
                    Ok(Some(PreparedOp::Upsert {
                        id: op.id,
                        operation: op.operation,
                        fields: snapshot.fields,
                        version: snapshot.version,
                    }))
                })
                .collect::<EngineResult<Vec<_>>>()
        })?;
        Ok(prepared.into_iter().flatten().collect())
    }

    fn record_success(&self, result: &SyncResult) {
        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        if result.mode.is_full() {
            stats.full_reconciliations += 1;
        } else {
            stats.incremental_scans += 1;
        }
        stats.documents_added += result.added;
        stats.documents_updated += result.updated;
        stats.documents_removed += result.removed;
        stats.apply_failures += result.failures.len() as u64;
        stats.last_sync_time = Some(Instant::now());
    }

    fn record_failure(&self, err: &SyncError) {
        let mut stats = self.stats.write();
        stats.passes_failed += 1;
        stats.last_error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::MemoryStateStore;
    use docmirror_core::{
        ChangeEntry, ChangeScan, CoreResult, DocumentId, DocumentSnapshot, Fields, Value, Version,
    };
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Minimal store: documents carry a "match" flag instead of being
    /// evaluated against the predicate.
    #[derive(Default)]
    struct FlagStore {
        docs: Mutex<HashMap<DocumentId, (Version, bool, u64)>>,
        deleted: Mutex<Vec<(DocumentId, Version, u64)>>,
        clock: Mutex<u64>,
    }

    impl FlagStore {
        fn tick(&self) -> u64 {
            let mut clock = self.clock.lock();
            *clock += 1;
            *clock
        }

        fn put(&self, id: DocumentId, matches: bool) {
            let at = self.tick();
            let mut docs = self.docs.lock();
            let seq = docs.get(&id).map_or(1, |(v, _, _)| v.sequence + 1);
            docs.insert(id, (Version::new(seq, at), matches, at));
        }

        fn delete(&self, id: DocumentId) {
            let at = self.tick();
            if let Some((v, _, _)) = self.docs.lock().remove(&id) {
                self.deleted.lock().push((id, v, at));
            }
        }
    }

    impl DocumentStore for FlagStore {
        fn store_id(&self) -> &str {
            "flags"
        }
        fn evaluate_all(&self, _predicate: &Predicate) -> CoreResult<HashSet<DocumentId>> {
            Ok(self
                .docs
                .lock()
                .iter()
                .filter(|(_, (_, m, _))| *m)
                .map(|(id, _)| *id)
                .collect())
        }
        fn scan_since(&self, _predicate: &Predicate, since: Watermark) -> CoreResult<ChangeScan> {
            let mut entries = Vec::new();
            for (id, (v, m, at)) in self.docs.lock().iter() {
                if *at > since.as_u64() {
                    entries.push(if *m {
                        ChangeEntry::matched(*id, *v)
                    } else {
                        ChangeEntry::unmatched(*id, *v)
                    });
                }
            }
            for (id, v, at) in self.deleted.lock().iter() {
                if *at > since.as_u64() {
                    entries.push(ChangeEntry::deleted(*id, *v));
                }
            }
            Ok(ChangeScan {
                entries,
                watermark: self.current_watermark()?,
            })
        }
        fn current_watermark(&self) -> CoreResult<Watermark> {
            Ok(Watermark::new(*self.clock.lock()))
        }
        fn fetch(&self, id: DocumentId, _fields: &FieldSet) -> CoreResult<Option<DocumentSnapshot>> {
            Ok(self.docs.lock().get(&id).map(|(v, _, _)| DocumentSnapshot {
                version: *v,
                fields: [("seq".to_string(), Value::from(i64::from(v.sequence)))].into(),
            }))
        }
    }

    #[derive(Default)]
    struct MapTarget {
        entries: Mutex<HashMap<DocumentId, (Fields, Version)>>,
    }

    impl SyncTarget for MapTarget {
        fn target_id(&self) -> &str {
            "map"
        }
        fn existing_ids(&self) -> CoreResult<HashSet<DocumentId>> {
            Ok(self.entries.lock().keys().copied().collect())
        }
        fn stored_version(&self, id: DocumentId) -> CoreResult<Option<Version>> {
            Ok(self.entries.lock().get(&id).map(|(_, v)| *v))
        }
        fn projection_fields(&self) -> FieldSet {
            FieldSet::All
        }
        fn upsert(&self, id: DocumentId, fields: &Fields, version: Version) -> CoreResult<()> {
            self.entries.lock().insert(id, (fields.clone(), version));
            Ok(())
        }
        fn remove(&self, id: DocumentId) -> CoreResult<()> {
            self.entries.lock().remove(&id);
            Ok(())
        }
    }

    fn engine() -> SyncEngine<MemoryStateStore> {
        SyncEngine::new(SyncConfig::new().with_fetch_workers(2), MemoryStateStore::new()).unwrap()
    }

    #[test]
    fn first_pass_is_full_then_incremental() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        let predicate = Predicate::new("flag");
        let ids: Vec<_> = (0..10).map(|_| DocumentId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            store.put(*id, i % 2 == 0);
        }

        let engine = engine();
        let first = engine.sync(&store, &predicate, &target).unwrap();
        assert_eq!(first.mode, ScanMode::FullReconciliation);
        assert_eq!(first.added, 5);
        assert_eq!(first.matched_scan, 5);
        assert_eq!(first.previous_watermark, None);
        assert!(first.state_advanced);

        let second = engine.sync(&store, &predicate, &target).unwrap();
        assert!(matches!(second.mode, ScanMode::Incremental { .. }));
        assert!(second.is_noop());
        assert_eq!(second.previous_watermark, Some(first.next_watermark));
    }

    #[test]
    fn identical_passes_compare_equal_whatever_their_duration() {
        let store = FlagStore::default();
        for i in 0..6 {
            store.put(DocumentId::new(), i % 3 == 0);
        }
        let predicate = Predicate::new("flag");

        let ours = engine().sync(&store, &predicate, &MapTarget::default()).unwrap();
        let theirs = engine().sync(&store, &predicate, &MapTarget::default()).unwrap();
        assert_eq!(ours, theirs);

        let mut slower = ours.clone();
        slower.duration += Duration::from_secs(5);
        assert_eq!(slower, ours);

        slower.added += 1;
        assert_ne!(slower, ours);
    }

    #[test]
    fn incremental_rules() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        let predicate = Predicate::new("flag");
        let kept = DocumentId::new();
        let leaving = DocumentId::new();
        let deleted = DocumentId::new();
        let stranger = DocumentId::new();
        for id in [kept, leaving, deleted] {
            store.put(id, true);
        }
        store.put(stranger, false);

        let engine = engine();
        engine.sync(&store, &predicate, &target).unwrap();

        let joining = DocumentId::new();
        store.put(kept, true);
        store.put(leaving, false);
        store.delete(deleted);
        store.put(stranger, false);
        store.put(joining, true);

        let result = engine.sync(&store, &predicate, &target).unwrap();
        assert_eq!(result.added, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.removed, 2);
        assert_eq!(result.matched_scan, 2);
        assert_eq!(result.unmatched_scan, 2);
        assert_eq!(result.deleted_scan, 1);

        let held = target.existing_ids().unwrap();
        assert_eq!(held, [kept, joining].into_iter().collect());
        assert_eq!(target.stored_version(kept).unwrap().unwrap().sequence, 2);
    }

    #[test]
    fn fingerprint_change_forces_full_reconciliation() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        store.put(DocumentId::new(), true);

        let engine = engine();
        engine.sync(&store, &Predicate::new("a"), &target).unwrap();
        let result = engine.sync(&store, &Predicate::new("b"), &target).unwrap();
        assert_eq!(result.mode, ScanMode::FullReconciliation);
        assert!(result.previous_watermark.is_some());
        assert!(result.is_noop());
    }

    #[test]
    fn engine_cancel_stops_passes_until_reset() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        store.put(DocumentId::new(), true);

        let engine = engine();
        engine.cancel();
        let err = engine.sync(&store, &Predicate::new("a"), &target).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(target.existing_ids().unwrap().is_empty());
        assert!(engine.state_for("flags", "map").unwrap().is_none());

        engine.reset_cancel();
        assert_eq!(engine.sync(&store, &Predicate::new("a"), &target).unwrap().added, 1);
    }

    #[test]
    fn stats_accumulate() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        store.put(DocumentId::new(), true);
        store.put(DocumentId::new(), true);

        let engine = engine();
        engine.sync(&store, &Predicate::new("a"), &target).unwrap();
        engine.sync(&store, &Predicate::new("a"), &target).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.passes_completed, 2);
        assert_eq!(stats.full_reconciliations, 1);
        assert_eq!(stats.incremental_scans, 1);
        assert_eq!(stats.documents_added, 2);
        assert!(stats.last_sync_time.is_some());
        assert!(stats.last_error.is_none());
    }

    #[test]
    fn reset_forces_full_reconciliation() {
        let store = FlagStore::default();
        let target = MapTarget::default();
        store.put(DocumentId::new(), true);

        let engine = engine();
        engine.sync(&store, &Predicate::new("a"), &target).unwrap();
        engine.reset("flags", "map").unwrap();
        let result = engine.sync(&store, &Predicate::new("a"), &target).unwrap();
        assert_eq!(result.mode, ScanMode::FullReconciliation);
        assert_eq!(result.previous_watermark, None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = SyncEngine::new(SyncConfig::new().with_fetch_workers(0), MemoryStateStore::new());
        assert!(matches!(err, Err(SyncError::Config(_))));
    }
}
