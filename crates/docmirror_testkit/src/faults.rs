//! Fault-injecting wrappers.
//!
//! Each wrapper delegates to an inner implementation until told to fail.
//! Switches are atomics so a test can flip them while a pass runs.

use docmirror_core::{
    ChangeScan, CoreError, CoreResult, DocumentId, DocumentSnapshot, DocumentStore, FieldSet,
    Fields, PairKey, PairLease, Predicate, SyncState, SyncStateStore, SyncTarget, Version,
    Watermark,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A store whose operations can be made to fail.
pub struct FailingStore<S> {
    inner: S,
    /// Fail `evaluate_all`.
    pub fail_evaluate: AtomicBool,
    /// Fail `scan_since`.
    pub fail_scan: AtomicBool,
    /// Fail `fetch`.
    pub fail_fetch: AtomicBool,
    /// Sleep this long (ms) in `evaluate_all` and `scan_since`.
    pub scan_delay_ms: AtomicU64,
}

impl<S: DocumentStore> FailingStore<S> {
    /// Wraps a store; nothing fails until a switch is set.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_evaluate: AtomicBool::new(false),
            fail_scan: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            scan_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn delay(&self) {
        let ms = self.scan_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

impl<S: DocumentStore> DocumentStore for FailingStore<S> {
    fn store_id(&self) -> &str {
        self.inner.store_id()
    }

    fn evaluate_all(&self, predicate: &Predicate) -> CoreResult<HashSet<DocumentId>> {
        self.delay();
        if self.fail_evaluate.load(Ordering::SeqCst) {
            return Err(CoreError::scan("injected evaluation failure"));
        }
        self.inner.evaluate_all(predicate)
    }

    fn scan_since(&self, predicate: &Predicate, since: Watermark) -> CoreResult<ChangeScan> {
        self.delay();
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(CoreError::scan("injected scan failure"));
        }
        self.inner.scan_since(predicate, since)
    }

    fn current_watermark(&self) -> CoreResult<Watermark> {
        self.inner.current_watermark()
    }

    fn fetch(&self, id: DocumentId, fields: &FieldSet) -> CoreResult<Option<DocumentSnapshot>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(CoreError::scan("injected fetch failure"));
        }
        self.inner.fetch(id, fields)
    }
}

/// A target that rejects chosen operations and counts calls.
pub struct FlakyTarget<T> {
    inner: T,
    /// Remaining failures per document ID.
    fail_ids: Mutex<HashMap<DocumentId, u32>>,
    /// Fail the next N upserts or removes regardless of ID.
    pub fail_next: AtomicU64,
    /// Fail `existing_ids`.
    pub fail_reads: AtomicBool,
    /// Fail `commit_batch`.
    pub fail_commit: AtomicBool,
    /// Sleep this long (ms) before every upsert or remove.
    pub op_delay_ms: AtomicU64,
    upserts: AtomicU64,
    removes: AtomicU64,
    rollbacks: AtomicU64,
}

impl<T: SyncTarget> FlakyTarget<T> {
    /// Wraps a target; nothing fails until told to.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            fail_ids: Mutex::new(HashMap::new()),
            fail_next: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            op_delay_ms: AtomicU64::new(0),
            upserts: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Returns the wrapped target.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Makes operations on `id` fail `times` times.
    pub fn fail_id(&self, id: DocumentId, times: u32) {
        self.fail_ids.lock().insert(id, times);
    }

    /// Successful upserts so far.
    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Successful removes so far.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::SeqCst)
    }

    /// Rollbacks so far.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn before_write(&self, id: DocumentId) -> CoreResult<()> {
        let ms = self.op_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
        let next = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if next.is_ok() {
            return Err(CoreError::target("injected failure"));
        }
        if let Some(left) = self.fail_ids.lock().get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                return Err(CoreError::target(format!("injected failure for {id}")));
            }
        }
        Ok(())
    }
}

impl<T: SyncTarget> SyncTarget for FlakyTarget<T> {
    fn target_id(&self) -> &str {
        self.inner.target_id()
    }

    fn existing_ids(&self) -> CoreResult<HashSet<DocumentId>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoreError::target("injected read failure"));
        }
        self.inner.existing_ids()
    }

    fn stored_version(&self, id: DocumentId) -> CoreResult<Option<Version>> {
        self.inner.stored_version(id)
    }

    fn projection_fields(&self) -> FieldSet {
        self.inner.projection_fields()
    }

    fn upsert(&self, id: DocumentId, fields: &Fields, version: Version) -> CoreResult<()> {
        self.before_write(id)?;
        self.inner.upsert(id, fields, version)?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, id: DocumentId) -> CoreResult<()> {
        self.before_write(id)?;
        self.inner.remove(id)?;
        self.removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        self.inner.is_transactional()
    }

    fn begin_batch(&self) -> CoreResult<()> {
        self.inner.begin_batch()
    }

    fn commit_batch(&self) -> CoreResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(CoreError::target("injected commit failure"));
        }
        self.inner.commit_batch()
    }

    fn rollback_batch(&self) -> CoreResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback_batch()
    }
}

/// A state store whose loads and saves can be made to fail.
pub struct FailingStateStore<S> {
    inner: S,
    /// Fail `load`.
    pub fail_load: AtomicBool,
    /// Fail `save`.
    pub fail_save: AtomicBool,
}

impl<S: SyncStateStore> FailingStateStore<S> {
    /// Wraps a state store; nothing fails until a switch is set.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_load: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SyncStateStore> SyncStateStore for FailingStateStore<S> {
    fn load(&self, key: &PairKey) -> CoreResult<Option<SyncState>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(CoreError::state_store("injected load failure"));
        }
        self.inner.load(key)
    }

    fn save(&self, key: &PairKey, state: &SyncState) -> CoreResult<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(CoreError::state_store("injected save failure"));
        }
        self.inner.save(key, state)
    }

    fn clear(&self, key: &PairKey) -> CoreResult<()> {
        self.inner.clear(key)
    }

    fn try_lease(&self, key: &PairKey) -> CoreResult<Option<PairLease>> {
        self.inner.try_lease(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_targets::MemoryIndexTarget;

    #[test]
    fn flaky_target_fails_then_recovers() {
        let target = FlakyTarget::new(MemoryIndexTarget::new("t", FieldSet::All));
        let id = DocumentId::new();
        target.fail_id(id, 2);

        let v = Version::new(1, 1);
        assert!(target.upsert(id, &Fields::new(), v).is_err());
        assert!(target.upsert(id, &Fields::new(), v).is_err());
        assert!(target.upsert(id, &Fields::new(), v).is_ok());
        assert_eq!(target.upserts(), 1);
    }

    #[test]
    fn fail_next_counts_down() {
        let target = FlakyTarget::new(MemoryIndexTarget::new("t", FieldSet::All));
        target.fail_next.store(1, Ordering::SeqCst);
        assert!(target.remove(DocumentId::new()).is_err());
        assert!(target.remove(DocumentId::new()).is_ok());
        assert_eq!(target.removes(), 1);
    }
}
