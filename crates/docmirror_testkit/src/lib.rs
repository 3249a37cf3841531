//! # docmirror testkit
//!
//! Test utilities for docmirror.
//!
//! This crate provides:
//! - Person-document fixtures and populated stores
//! - Property-based generators for store mutations and predicates
//! - Fault-injecting wrappers for stores, targets and state stores
//! - A closure-invariant checker
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docmirror_testkit::prelude::*;
//!
//! let people = PeopleFixture::populate(1_000, 8);
//! let target = MemoryIndexTarget::new("people", FieldSet::All);
//! engine.sync(&people.store, &person_predicate(), &target)?;
//! assert_closed(&people.store, &person_predicate(), &target);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod closure;
pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::closure::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use closure::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
