//! Commit log store - SQLite persistence for committed object graphs
//!
//! Provides:
//! - Migrations framework for the store's own bookkeeping tables
//! - Entity and join tables derived from an `EntityResolver`
//! - Batched flush of inserts, updates, deletes and join rows
//! - Thread-bound transactions that nested commits join
//! - A commit journal holding serialized change maps

pub mod db;
pub mod errors;
pub mod flush;
pub mod journal;
pub mod migrations;
pub mod rows;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod values;

pub use errors::Result;
pub use flush::{FlushBatch, JoinRow, KeyChange, RowWrite};
pub use journal::JournalEntry;
pub use rows::Row;
pub use store::Store;
pub use transaction::{has_thread_transaction, TransactionScope};
