//! Core type definitions for docmirror.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content revision of a document.
///
/// A version is the pair (sequence number, sequence time). The sequence
/// number increases by one on every modification of the document; the
/// sequence time is the timestamp of that modification in microseconds
/// since the Unix epoch. Ordering compares the sequence number first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Per-document modification counter.
    pub sequence: u32,
    /// Time of the last modification (µs since epoch).
    pub sequence_time: u64,
}

impl Version {
    /// Creates a new version.
    #[must_use]
    pub const fn new(sequence: u32, sequence_time: u64) -> Self {
        Self {
            sequence,
            sequence_time,
        }
    }

    /// Returns true if this version is strictly newer than `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}@{}", self.sequence, self.sequence_time)
    }
}

/// Opaque cursor into a store's change history.
///
/// Produced by the store after each scan and handed back on the next
/// scan. The engine only stores and compares watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(pub u64);

impl Watermark {
    /// The watermark preceding every change.
    pub const ORIGIN: Watermark = Watermark(0);

    /// Creates a new watermark.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw cursor value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wm:{}", self.0)
    }
}

/// Value equal iff two predicate invocations select the same documents.
///
/// The fingerprint is the predicate's literal source text; comparison is
/// byte-exact, so whitespace or case edits count as a different selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A selection expression in the store's native language.
///
/// Opaque to the engine: it is only passed back to the store and
/// fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    text: String,
}

impl Predicate {
    /// Creates a predicate from its source text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Returns the source text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the fingerprint used to detect predicate changes.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.text.clone())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Predicate {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Predicate {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}
