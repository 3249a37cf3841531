//! Error types for the sync engine.

use crate::engine::SyncResult;
use docmirror_core::{CoreError, DocumentId};
use thiserror::Error;

/// Result type for sync passes.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can end a sync pass.
///
/// Every variant except `StateNotAdvanced` means the persisted sync state
/// was left untouched.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The predicate could not be compiled or evaluated.
    #[error("predicate error: {0}")]
    Predicate(#[source] CoreError),

    /// The store failed while evaluating the predicate, scanning changes or
    /// fetching documents.
    #[error("scan failed: {0}")]
    Scan(#[source] CoreError),

    /// The prior sync state could not be read.
    #[error("failed to load sync state: {0}")]
    StateLoad(#[source] CoreError),

    /// The target could not report its current contents.
    #[error("failed to read target: {0}")]
    TargetRead(#[source] CoreError),

    /// A transactional target failed on every attempt.
    #[error("batch aborted after {attempts} attempt(s): {source}")]
    BatchAborted {
        /// How many times the batch was tried.
        attempts: u32,
        /// Document whose operation failed last, if the failure was per-document.
        document: Option<DocumentId>,
        /// Last failure.
        #[source]
        source: CoreError,
    },

    /// The delta was applied but the new watermark could not be saved.
    ///
    /// The next pass will re-derive and re-apply the same delta.
    #[error("delta applied but sync state not advanced: {source}")]
    StateNotAdvanced {
        /// What the pass applied.
        result: Box<SyncResult>,
        /// Why the state could not be saved.
        #[source]
        source: CoreError,
    },

    /// Another pass for the same (store, target) pair is running.
    #[error("a sync pass for {pair} is already in progress")]
    PassInProgress {
        /// The contended pair, as `store -> target`.
        pair: String,
    },

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The pass exceeded its timeout.
    #[error("sync timed out")]
    Timeout,

    /// The engine could not be set up.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Classifies a store-side error: predicate errors stay predicate
    /// errors, everything else is a scan failure.
    pub fn from_store(err: CoreError) -> Self {
        match err {
            CoreError::Predicate { .. } => SyncError::Predicate(err),
            other => SyncError::Scan(other),
        }
    }

    /// Returns true if running the same pass again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Scan(_)
            | SyncError::StateLoad(_)
            | SyncError::TargetRead(_)
            | SyncError::BatchAborted { .. }
            | SyncError::StateNotAdvanced { .. }
            | SyncError::PassInProgress { .. }
            | SyncError::Timeout => true,
            SyncError::Predicate(_) | SyncError::Cancelled | SyncError::Config(_) => false,
        }
    }

    /// Returns true if the target may have been modified by the failed pass.
    pub fn target_touched(&self) -> bool {
        matches!(
            self,
            SyncError::BatchAborted { .. }
                | SyncError::StateNotAdvanced { .. }
                | SyncError::Cancelled
                | SyncError::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        let err = SyncError::from_store(CoreError::predicate("Form =", "unexpected end"));
        assert!(matches!(err, SyncError::Predicate(_)));
        assert!(!err.is_retryable());

        let err = SyncError::from_store(CoreError::scan("store offline"));
        assert!(matches!(err, SyncError::Scan(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(SyncError::PassInProgress {
            pair: "a -> b".into()
        }
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::BatchAborted {
            attempts: 2,
            document: None,
            source: CoreError::target("disk full"),
        };
        assert_eq!(
            err.to_string(),
            "batch aborted after 2 attempt(s): target error: disk full"
        );

        let err = SyncError::PassInProgress {
            pair: "names -> people".into(),
        };
        assert!(err.to_string().contains("names -> people"));
    }
}
