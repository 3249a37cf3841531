//! Per-(store, target) pass exclusivity.
//!
//! A pass first claims its pair in the engine's [`PassRegistry`], then takes
//! a lease from the state store. The registry orders passes within one
//! process; the lease orders passes across every process sharing the
//! state store.

use crate::config::{ConcurrentPassPolicy, PassContext};
use crate::error::{EngineResult, SyncError};
use docmirror_core::{PairKey, PairLease, SyncStateStore};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest single wait before re-checking cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Tracks which pairs have a pass in flight.
///
/// Engines sharing a registry exclude each other; give every engine that
/// may touch the same pair the same `Arc<PassRegistry>`.
#[derive(Debug, Default)]
pub struct PassRegistry {
    active: Mutex<HashSet<PairKey>>,
    released: Condvar,
}

impl PassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a pass for the pair is running.
    pub fn is_active(&self, key: &PairKey) -> bool {
        self.active.lock().contains(key)
    }

    /// Number of passes currently running.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Claims the pair for one pass.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        key: &PairKey,
        policy: ConcurrentPassPolicy,
        ctx: &PassContext,
    ) -> EngineResult<PassGuard> {
        let mut active = self.active.lock();
        while active.contains(key) {
            if policy == ConcurrentPassPolicy::Reject {
                return Err(SyncError::PassInProgress {
                    pair: key.to_string(),
                });
            }
            ctx.check()?;
            debug!(pair = %key, "waiting for running pass");
            self.released.wait_for(&mut active, wait_slice(ctx));
        }
        active.insert(key.clone());
        Ok(PassGuard {
            registry: Arc::clone(self),
            key: key.clone(),
        })
    }
}

/// Claims the pair in `registry` and then in `state_store`, honouring the
/// same policy, cancellation and deadline for both.
pub(crate) fn claim<S: SyncStateStore + ?Sized>(
    registry: &Arc<PassRegistry>,
    state_store: &S,
    key: &PairKey,
    policy: ConcurrentPassPolicy,
    ctx: &PassContext,
) -> EngineResult<PassClaim> {
    let guard = registry.acquire(key, policy, ctx)?;
    loop {
        if let Some(lease) = state_store.try_lease(key).map_err(SyncError::StateLoad)? {
            return Ok(PassClaim {
                _lease: lease,
                _guard: guard,
            });
        }
        if policy == ConcurrentPassPolicy::Reject {
            return Err(SyncError::PassInProgress {
                pair: key.to_string(),
            });
        }
        ctx.check()?;
        debug!(pair = %key, "waiting for pass held through the state store");
        thread::sleep(wait_slice(ctx));
    }
}

fn wait_slice(ctx: &PassContext) -> Duration {
    match ctx.deadline() {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(WAIT_SLICE),
        None => WAIT_SLICE,
    }
}

/// Both holds on a pair. The lease is released before the registry slot.
#[derive(Debug)]
pub(crate) struct PassClaim {
    _lease: PairLease,
    _guard: PassGuard,
}

/// Releases the pair when dropped.
#[derive(Debug)]
pub(crate) struct PassGuard {
    registry: Arc<PassRegistry>,
    key: PairKey,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.key);
        self.registry.released.notify_all();
    }
}
