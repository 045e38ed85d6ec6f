//! Commit log engine - the persistence runtime with change capture
//!
//! Provides:
//! - `Runtime`/`RuntimeBuilder` wiring metadata, store, callbacks and
//!   the commit log module
//! - `ObjectContext`, a unit of work that records graph diffs while
//!   objects are created, modified and deleted
//! - Lifecycle callbacks run before each flush
//! - The commit orchestrator that flushes, builds the `ChangeMap` and
//!   dispatches it to `CommitLogListener`s

pub mod callbacks;
pub mod commit_log;
pub mod context;
pub mod journal_listener;
pub mod listener;
pub mod module;
pub mod runtime;

pub use callbacks::{CallbackRegistry, LifecyclePhase};
pub use commit_log::{CommitLogFilter, CommitPhase};
pub use context::{ObjectContext, PersistenceState};
pub use journal_listener::JournalListener;
pub use listener::CommitLogListener;
pub use module::{CommitLogModule, CommitLogModuleExtender};
pub use runtime::{Runtime, RuntimeBuilder};

pub type Result<T> = std::result::Result<T, commitlog_core::ExError>;
