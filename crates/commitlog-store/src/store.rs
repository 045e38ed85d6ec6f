//! The store handle: one SQLite connection shared by every context of a
//! runtime.
//!
//! Statements from a thread that holds the store's bound transaction go
//! straight to the connection. Every other thread first passes the
//! transaction gate, so it waits for an open transaction to finish instead
//! of writing into it.

#![allow(clippy::result_large_err)]

use crate::errors::{poisoned, Result};
use crate::{db, migrations, transaction};
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

pub struct Store {
    id: u64,
    conn: Mutex<Connection>,
    tx_gate: Mutex<()>,
}

impl Store {
    /// Open (or create) a database file and apply migrations
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = db::open(path)?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory database with migrations applied
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, applying migrations
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        db::configure(&conn)?;
        migrations::apply_migrations(&mut conn)?;
        Ok(Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            conn: Mutex::new(conn),
            tx_gate: Mutex::new(()),
        })
    }

    /// Process-unique id used to bind transactions to threads
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True when the calling thread holds this store's transaction
    pub fn in_transaction(&self) -> bool {
        transaction::is_bound(self.id)
    }

    /// Run `f` against the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let _gate = if self.in_transaction() {
            None
        } else {
            Some(self.lock_gate()?)
        };
        let conn = self.conn.lock().map_err(|_| poisoned("connection"))?;
        f(&conn)
    }

    pub(crate) fn lock_gate(&self) -> Result<MutexGuard<'_, ()>> {
        self.tx_gate.lock().map_err(|_| poisoned("transaction gate"))
    }

    /// Connection access for the transaction owner, which already holds the
    /// gate
    pub(crate) fn with_conn_ungated<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| poisoned("connection"))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("id", &self.id).finish()
    }
}
