//! Apply phase: drives the target through its capability contract.

use crate::config::PassContext;
use crate::error::{EngineResult, SyncError};
use docmirror_core::{CoreError, DocumentId, Fields, SyncTarget, Version};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Kind of change applied to a target entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Materialize a newly matching document.
    Add,
    /// Overwrite a document whose version changed.
    Update,
    /// Drop a document that no longer matches or was deleted.
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Remove => "remove",
        })
    }
}

/// A single operation a non-transactional target rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyFailure {
    /// Affected document.
    pub id: DocumentId,
    /// What the engine tried to do.
    pub operation: Operation,
    /// The target's error message.
    pub message: String,
}

/// An operation with its projection fetched, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PreparedOp {
    Upsert {
        id: DocumentId,
        operation: Operation,
        fields: Fields,
        version: Version,
    },
    Remove {
        id: DocumentId,
    },
}

impl PreparedOp {
    fn id(&self) -> DocumentId {
        match self {
            PreparedOp::Upsert { id, .. } | PreparedOp::Remove { id } => *id,
        }
    }

    fn operation(&self) -> Operation {
        match self {
            PreparedOp::Upsert { operation, .. } => *operation,
            PreparedOp::Remove { .. } => Operation::Remove,
        }
    }

    fn apply_to<T: SyncTarget + ?Sized>(&self, target: &T) -> Result<(), CoreError> {
        match self {
            PreparedOp::Upsert {
                id,
                fields,
                version,
                ..
            } => target.upsert(*id, fields, *version),
            PreparedOp::Remove { id } => target.remove(*id),
        }
    }
}

/// Counts of operations committed to the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ApplyOutcome {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyOutcome {
    fn count(&mut self, operation: Operation) {
        match operation {
            Operation::Add => self.added += 1,
            Operation::Update => self.updated += 1,
            Operation::Remove => self.removed += 1,
        }
    }
}

/// Applies the operations, picking the policy the target declares.
pub(crate) fn apply<T: SyncTarget + ?Sized>(
    target: &T,
    ops: &[PreparedOp],
    ctx: &PassContext,
    retries: u32,
) -> EngineResult<ApplyOutcome> {
    if target.is_transactional() {
        apply_transactional(target, ops, ctx, retries)
    } else {
        apply_best_effort(target, ops, ctx)
    }
}

/// One operation at a time; a rejected operation is recorded and skipped.
fn apply_best_effort<T: SyncTarget + ?Sized>(
    target: &T,
    ops: &[PreparedOp],
    ctx: &PassContext,
) -> EngineResult<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();
    for op in ops {
        ctx.check()?;
        match op.apply_to(target) {
            Ok(()) => outcome.count(op.operation()),
            Err(err) => {
                warn!(id = %op.id(), operation = %op.operation(), error = %err, "operation failed, skipping");
                outcome.failures.push(ApplyFailure {
                    id: op.id(),
                    operation: op.operation(),
                    message: err.to_string(),
                });
            }
        }
    }
    Ok(outcome)
}

/// Why one batch attempt stopped.
enum BatchFailure {
    /// The target failed; worth another attempt.
    Target {
        document: Option<DocumentId>,
        source: CoreError,
    },
    /// Cancellation or timeout; ends the pass.
    Interrupted(SyncError),
}

/// The whole delta as one batch, retried `retries` times before aborting.
fn apply_transactional<T: SyncTarget + ?Sized>(
    target: &T,
    ops: &[PreparedOp],
    ctx: &PassContext,
    retries: u32,
) -> EngineResult<ApplyOutcome> {
    ctx.check()?;
    let attempts = retries.saturating_add(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match apply_batch(target, ops, ctx) {
            Ok(outcome) => {
                if attempt > 1 {
                    debug!(attempt, "batch succeeded after retry");
                }
                return Ok(outcome);
            }
            Err(BatchFailure::Interrupted(err)) => {
                rollback(target);
                return Err(err);
            }
            Err(BatchFailure::Target { document, source }) => {
                rollback(target);
                if attempt >= attempts {
                    warn!(attempt, error = %source, "batch failed, aborting pass");
                    return Err(SyncError::BatchAborted {
                        attempts: attempt,
                        document,
                        source,
                    });
                }
                warn!(attempt, error = %source, "batch failed, retrying");
            }
        }
    }
}

fn apply_batch<T: SyncTarget + ?Sized>(
    target: &T,
    ops: &[PreparedOp],
    ctx: &PassContext,
) -> Result<ApplyOutcome, BatchFailure> {
    target.begin_batch().map_err(|source| BatchFailure::Target {
        document: None,
        source,
    })?;

    let mut outcome = ApplyOutcome::default();
    for op in ops {
        ctx.check().map_err(BatchFailure::Interrupted)?;
        op.apply_to(target).map_err(|source| BatchFailure::Target {
            document: Some(op.id()),
            source,
        })?;
        outcome.count(op.operation());
    }

    target.commit_batch().map_err(|source| BatchFailure::Target {
        document: None,
        source,
    })?;
    Ok(outcome)
}

fn rollback<T: SyncTarget + ?Sized>(target: &T) {
    if let Err(err) = target.rollback_batch() {
        warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_core::FieldSet;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Records calls; fails upserts for chosen IDs a limited number of times.
    #[derive(Default)]
    struct ScriptedTarget {
        transactional: bool,
        entries: Mutex<HashMap<DocumentId, Version>>,
        fail: Mutex<HashMap<DocumentId, u32>>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedTarget {
        fn failing(transactional: bool, id: DocumentId, times: u32) -> Self {
            let target = Self {
                transactional,
                ..Self::default()
            };
            target.fail.lock().insert(id, times);
            target
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    impl SyncTarget for ScriptedTarget {
        fn target_id(&self) -> &str {
            "scripted"
        }
        fn existing_ids(&self) -> docmirror_core::CoreResult<HashSet<DocumentId>> {
            Ok(self.entries.lock().keys().copied().collect())
        }
        fn stored_version(&self, id: DocumentId) -> docmirror_core::CoreResult<Option<Version>> {
            Ok(self.entries.lock().get(&id).copied())
        }
        fn projection_fields(&self) -> FieldSet {
            FieldSet::All
        }
        fn upsert(
            &self,
            id: DocumentId,
            _fields: &Fields,
            version: Version,
        ) -> docmirror_core::CoreResult<()> {
            if let Some(left) = self.fail.lock().get_mut(&id) {
                if *left > 0 {
                    *left -= 1;
                    self.log.lock().push("fail".into());
                    return Err(CoreError::target("rejected"));
                }
            }
            self.log.lock().push("upsert".into());
            self.entries.lock().insert(id, version);
            Ok(())
        }
        fn remove(&self, id: DocumentId) -> docmirror_core::CoreResult<()> {
            self.log.lock().push("remove".into());
            self.entries.lock().remove(&id);
            Ok(())
        }
        fn is_transactional(&self) -> bool {
            self.transactional
        }
        fn begin_batch(&self) -> docmirror_core::CoreResult<()> {
            self.log.lock().push("begin".into());
            Ok(())
        }
        fn commit_batch(&self) -> docmirror_core::CoreResult<()> {
            self.log.lock().push("commit".into());
            Ok(())
        }
        fn rollback_batch(&self) -> docmirror_core::CoreResult<()> {
            self.log.lock().push("rollback".into());
            Ok(())
        }
    }

    fn upsert(id: DocumentId, operation: Operation) -> PreparedOp {
        PreparedOp::Upsert {
            id,
            operation,
            fields: Fields::new(),
            version: Version::new(1, 1),
        }
    }

    fn ctx() -> PassContext {
        PassContext::new(None, None)
    }

    #[test]
    fn best_effort_records_and_continues() {
        let bad = DocumentId::new();
        let good = DocumentId::new();
        let target = ScriptedTarget::failing(false, bad, 1);
        let ops = vec![
            upsert(bad, Operation::Add),
            upsert(good, Operation::Add),
            PreparedOp::Remove {
                id: DocumentId::new(),
            },
        ];

        let outcome = apply(&target, &ops, &ctx(), 1).unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, bad);
        assert_eq!(outcome.failures[0].operation, Operation::Add);
        assert!(!target.log().contains(&"begin".to_string()));
    }

    #[test]
    fn transactional_retries_once() {
        let flaky = DocumentId::new();
        let target = ScriptedTarget::failing(true, flaky, 1);
        let ops = vec![upsert(flaky, Operation::Update)];

        let outcome = apply(&target, &ops, &ctx(), 1).unwrap();
        assert_eq!(outcome.updated, 1);
        assert!(outcome.failures.is_empty());
        assert_eq!(
            target.log(),
            vec!["begin", "fail", "rollback", "begin", "upsert", "commit"]
        );
    }

    #[test]
    fn transactional_aborts_after_retry() {
        let broken = DocumentId::new();
        let target = ScriptedTarget::failing(true, broken, 5);
        let ops = vec![upsert(DocumentId::new(), Operation::Add), upsert(broken, Operation::Add)];

        let err = apply(&target, &ops, &ctx(), 1).unwrap_err();
        match err {
            SyncError::BatchAborted {
                attempts, document, ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(document, Some(broken));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(target.log().iter().filter(|l| *l == "rollback").count(), 2);
        assert!(!target.log().contains(&"commit".to_string()));
    }

    #[test]
    fn cancelled_pass_never_opens_a_batch() {
        let target = ScriptedTarget {
            transactional: true,
            ..ScriptedTarget::default()
        };
        let token = crate::config::CancelToken::new();
        token.cancel();
        let ctx = PassContext::new(None, Some(token));

        let err = apply(&target, &[upsert(DocumentId::new(), Operation::Add)], &ctx, 1).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(target.log().is_empty());
    }

    #[test]
    fn timeout_mid_batch_rolls_back() {
        let target = ScriptedTarget {
            transactional: true,
            ..ScriptedTarget::default()
        };
        let ctx = PassContext::new(Some(std::time::Duration::from_millis(5)), None);
        assert!(ctx.check().is_ok());
        std::thread::sleep(std::time::Duration::from_millis(10));

        // The deadline passes between the pre-check and the first operation.
        let err = apply_batch(&target, &[upsert(DocumentId::new(), Operation::Add)], &ctx);
        assert!(matches!(err, Err(BatchFailure::Interrupted(SyncError::Timeout))));
        assert_eq!(target.log(), vec!["begin"]);
    }
}
