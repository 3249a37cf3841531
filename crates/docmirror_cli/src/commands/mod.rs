//! CLI command implementations.

pub mod state;
pub mod store;
pub mod sync;
pub mod target;
