//! Thread-bound transactions.
//!
//! The first [`TransactionScope::begin`] on a thread opens a SQLite
//! transaction and binds it to that thread (the owner scope). Further
//! `begin` calls on the same thread for the same store join it. A joined
//! scope dropped without `commit` marks the transaction rollback-only; the
//! owner's `commit` then rolls back and reports `TransactionRolledBack`.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use crate::store::Store;
use commitlog_core::errors::{ExError, ExErrorKind};
use std::cell::RefCell;
use std::sync::MutexGuard;

#[derive(Debug)]
struct Binding {
    store_id: u64,
    rollback_only: bool,
}

thread_local! {
    static BOUND: RefCell<Vec<Binding>> = const { RefCell::new(Vec::new()) };
}

/// True when the calling thread has any bound transaction
pub fn has_thread_transaction() -> bool {
    BOUND.with(|b| !b.borrow().is_empty())
}

pub(crate) fn is_bound(store_id: u64) -> bool {
    BOUND.with(|b| b.borrow().iter().any(|binding| binding.store_id == store_id))
}

fn bind(store_id: u64) {
    BOUND.with(|b| {
        b.borrow_mut().push(Binding {
            store_id,
            rollback_only: false,
        })
    });
}

fn unbind(store_id: u64) {
    BOUND.with(|b| b.borrow_mut().retain(|binding| binding.store_id != store_id));
}

fn mark_rollback_only(store_id: u64) {
    BOUND.with(|b| {
        for binding in b.borrow_mut().iter_mut() {
            if binding.store_id == store_id {
                binding.rollback_only = true;
            }
        }
    });
}

fn is_rollback_only(store_id: u64) -> bool {
    BOUND.with(|b| {
        b.borrow()
            .iter()
            .any(|binding| binding.store_id == store_id && binding.rollback_only)
    })
}

enum Role<'a> {
    Owner { _gate: MutexGuard<'a, ()> },
    Joined,
}

/// A handle on the thread's transaction for one store
pub struct TransactionScope<'a> {
    store: &'a Store,
    role: Role<'a>,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    /// Open a new transaction or join the one bound to this thread
    pub fn begin(store: &'a Store) -> Result<Self> {
        if store.in_transaction() {
            return Ok(Self {
                store,
                role: Role::Joined,
                finished: false,
            });
        }

        let gate = store.lock_gate()?;
        store.with_conn_ungated(|conn| conn.execute_batch("BEGIN").map_err(from_rusqlite))?;
        bind(store.id());
        tracing::debug!(store_id = store.id(), "transaction started");

        Ok(Self {
            store,
            role: Role::Owner { _gate: gate },
            finished: false,
        })
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.role, Role::Owner { .. })
    }

    /// Force the transaction to roll back when its owner finishes
    pub fn set_rollback_only(&self) {
        mark_rollback_only(self.store.id());
    }

    pub fn is_rollback_only(&self) -> bool {
        is_rollback_only(self.store.id())
    }

    /// Commit. A joined scope only records that it completed; the owner
    /// commits, or rolls back if the transaction was marked rollback-only.
    ///
    /// # Errors
    ///
    /// `TransactionRolledBack` when the transaction was rollback-only,
    /// `Persistence` when SQLite rejects the commit.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if !self.is_owner() {
            return Ok(());
        }

        let store_id = self.store.id();
        if is_rollback_only(store_id) {
            let rollback = self.end("ROLLBACK");
            rollback?;
            return Err(ExError::new(ExErrorKind::TransactionRolledBack)
                .with_op("commit")
                .with_message("Transaction was marked rollback-only"));
        }

        let committed = self.end("COMMIT");
        if committed.is_err() {
            // SQLite may leave the transaction open after a failed COMMIT
            let rollback = self
                .store
                .with_conn_ungated(|conn| conn.execute_batch("ROLLBACK").map_err(from_rusqlite));
            if let Err(err) = rollback {
                tracing::warn!(
                    store_id,
                    err_code = err.code(),
                    message = err.message(),
                    "rollback after failed commit failed"
                );
            }
        }
        committed
    }

    /// Roll back; a joined scope marks the transaction rollback-only
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        if self.is_owner() {
            self.end("ROLLBACK")
        } else {
            self.set_rollback_only();
            Ok(())
        }
    }

    fn end(&self, statement: &str) -> Result<()> {
        let result = self
            .store
            .with_conn_ungated(|conn| conn.execute_batch(statement).map_err(from_rusqlite));
        unbind(self.store.id());
        tracing::debug!(store_id = self.store.id(), statement, "transaction finished");
        result
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.is_owner() {
            if let Err(err) = self.end("ROLLBACK") {
                tracing::warn!(err_code = err.code(), "rollback on drop failed");
            }
        } else {
            self.set_rollback_only();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_and_joined_scopes() {
        let store = Store::open_in_memory().unwrap();
        assert!(!has_thread_transaction());

        let outer = TransactionScope::begin(&store).unwrap();
        assert!(outer.is_owner());
        assert!(has_thread_transaction());

        let inner = TransactionScope::begin(&store).unwrap();
        assert!(!inner.is_owner());
        inner.commit().unwrap();
        assert!(has_thread_transaction());

        outer.commit().unwrap();
        assert!(!has_thread_transaction());
    }

    #[test]
    fn test_dropped_joined_scope_forces_rollback() {
        let store = Store::open_in_memory().unwrap();
        let outer = TransactionScope::begin(&store).unwrap();
        {
            let _inner = TransactionScope::begin(&store).unwrap();
        }
        assert!(outer.is_rollback_only());

        let err = outer.commit().unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::TransactionRolledBack);
        assert!(!has_thread_transaction());
    }

    #[test]
    fn test_dropped_owner_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        {
            let _scope = TransactionScope::begin(&store).unwrap();
            store
                .with_conn(|conn| {
                    conn.execute_batch("CREATE TABLE t (x)").map_err(from_rusqlite)
                })
                .unwrap();
        }
        assert!(!has_thread_transaction());

        let exists: i64 = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 't'",
                    [],
                    |row| row.get(0),
                )
                .map_err(from_rusqlite)
            })
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_failed_commit_is_rolled_back() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys = ON;
                     CREATE TABLE p (id INTEGER PRIMARY KEY);
                     CREATE TABLE c (pid INTEGER REFERENCES p(id) DEFERRABLE INITIALLY DEFERRED);",
                )
                .map_err(from_rusqlite)
            })
            .unwrap();

        // the dangling reference is only checked at COMMIT
        let scope = TransactionScope::begin(&store).unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch("INSERT INTO c (pid) VALUES (99)")
                    .map_err(from_rusqlite)
            })
            .unwrap();
        let err = scope.commit().unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Persistence);
        assert!(!has_thread_transaction());

        // the connection is usable again and nothing was kept
        let next = TransactionScope::begin(&store).unwrap();
        next.commit().unwrap();
        let rows: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM c", [], |row| row.get(0))
                    .map_err(from_rusqlite)
            })
            .unwrap();
        assert_eq!(rows, 0);
    }
}
