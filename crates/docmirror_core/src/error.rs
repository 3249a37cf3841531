//! Error types shared by stores, targets and state stores.

use crate::id::DocumentId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the collaborators the sync engine talks to.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The selection predicate could not be compiled or evaluated.
    #[error("invalid predicate {predicate:?}: {message}")]
    Predicate {
        /// Predicate source text.
        predicate: String,
        /// What went wrong.
        message: String,
    },

    /// The store failed while enumerating documents.
    #[error("scan failed: {message}")]
    Scan {
        /// Description of the failure.
        message: String,
    },

    /// The store can no longer enumerate changes since this watermark.
    ///
    /// Raised when deletion stubs newer than the watermark were purged.
    #[error("watermark {requested} is older than the purge horizon {horizon}")]
    WatermarkExpired {
        /// The watermark the caller asked for.
        requested: u64,
        /// Oldest watermark the store can still answer for.
        horizon: u64,
    },

    /// Document not found.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// A sink rejected an operation.
    #[error("target error: {message}")]
    Target {
        /// Description of the failure.
        message: String,
    },

    /// The watermark store failed.
    #[error("state store error: {message}")]
    StateStore {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a predicate error.
    pub fn predicate(predicate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Predicate {
            predicate: predicate.into(),
            message: message.into(),
        }
    }

    /// Creates a scan error.
    pub fn scan(message: impl Into<String>) -> Self {
        Self::Scan {
            message: message.into(),
        }
    }

    /// Creates a target error.
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Creates a state store error.
    pub fn state_store(message: impl Into<String>) -> Self {
        Self::StateStore {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_error_names_the_text() {
        let err = CoreError::predicate("Form = ", "unexpected end of input");
        let msg = err.to_string();
        assert!(msg.contains("Form = "));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn watermark_expired_display() {
        let err = CoreError::WatermarkExpired {
            requested: 3,
            horizon: 10,
        };
        assert_eq!(
            err.to_string(),
            "watermark 3 is older than the purge horizon 10"
        );
    }

    #[test]
    fn io_conversion() {
        let err: CoreError = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
