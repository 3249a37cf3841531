//! Persisted per-pair sync state.

use crate::error::CoreResult;
use crate::types::{Fingerprint, Watermark};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a (store, target) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    /// Document store identity.
    pub store_id: String,
    /// Sync target identity.
    pub target_id: String,
}

impl PairKey {
    /// Creates a pair key.
    pub fn new(store_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            target_id: target_id.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.store_id, self.target_id)
    }
}

/// What the engine remembers between passes for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Watermark returned by the last successful pass.
    pub watermark: Watermark,
    /// Fingerprint of the predicate used by that pass.
    pub fingerprint: Fingerprint,
}

/// Exclusive hold on a pair for the length of one pass.
///
/// Dropping the lease releases the pair.
pub struct PairLease {
    _held: Option<Box<dyn Send + Sync>>,
}

impl PairLease {
    /// A lease with nothing behind it, for stores private to one process.
    #[must_use]
    pub fn local() -> Self {
        Self { _held: None }
    }

    /// A lease that keeps `held` alive until it is dropped.
    pub fn holding<T: Send + Sync + 'static>(held: T) -> Self {
        Self {
            _held: Some(Box::new(held)),
        }
    }
}

impl fmt::Debug for PairLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairLease")
            .field("shared", &self._held.is_some())
            .finish()
    }
}

/// Persistence for `SyncState`, keyed by pair.
///
/// Read once at the start and written once at the end of a successful
/// pass. Any error is fatal to the pass.
///
/// A store that several processes can open also arbitrates which of them
/// may run a pass for a pair, through [`try_lease`](Self::try_lease).
pub trait SyncStateStore: Send + Sync {
    /// Loads the state for a pair; `None` before the first sync.
    fn load(&self, key: &PairKey) -> CoreResult<Option<SyncState>>;

    /// Overwrites the state for a pair.
    fn save(&self, key: &PairKey, state: &SyncState) -> CoreResult<()>;

    /// Forgets the state for a pair, forcing a full reconciliation next time.
    fn clear(&self, key: &PairKey) -> CoreResult<()>;

    /// Tries to take the pair for one pass. `Ok(None)` means another
    /// holder, possibly in another process, has it.
    ///
    /// The default always grants a local lease; a store nobody else can open
    /// needs no more than the engine's in-process exclusion.
    fn try_lease(&self, key: &PairKey) -> CoreResult<Option<PairLease>> {
        let _ = key;
        Ok(Some(PairLease::local()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Predicate;

    #[test]
    fn sync_state_cbor_roundtrip() {
        let state = SyncState {
            watermark: Watermark::new(17),
            fingerprint: Predicate::new("@All").fingerprint(),
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&state, &mut buf).unwrap();
        let back: SyncState = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn default_lease_is_always_granted() {
        struct Nothing;
        impl SyncStateStore for Nothing {
            fn load(&self, _: &PairKey) -> CoreResult<Option<SyncState>> {
                Ok(None)
            }
            fn save(&self, _: &PairKey, _: &SyncState) -> CoreResult<()> {
                Ok(())
            }
            fn clear(&self, _: &PairKey) -> CoreResult<()> {
                Ok(())
            }
        }

        let key = PairKey::new("s", "t");
        let first = Nothing.try_lease(&key).unwrap().unwrap();
        assert!(Nothing.try_lease(&key).unwrap().is_some());
        assert_eq!(format!("{first:?}"), "PairLease { shared: false }");
    }

    #[test]
    fn pair_key_display() {
        assert_eq!(PairKey::new("names.db", "people").to_string(), "names.db -> people");
    }
}
