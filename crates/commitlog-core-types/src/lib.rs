//! Core types shared across the commit-log crates
//!
//! - **Correlation types**: CommitId, ContextId, CommitContext
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{CommitContext, CommitId, ContextId};
