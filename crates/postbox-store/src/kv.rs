//! Ordered byte-keyed storage.
//!
//! [`KvStore`] owns a [`rusqlite::Connection`] holding one `kv` table and
//! exposes the small set of primitives the mailbox needs: point reads and
//! writes, ordered prefix scans and atomic batches. The connection sits
//! behind a mutex so a single store can be shared across tasks; closing it
//! is idempotent and every later call fails with [`StoreError::Closed`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migrations;

/// A single write inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A group of writes applied in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Append every op of `other` after the ops already queued.
    pub fn extend(&mut self, other: Batch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Wrapper around a [`rusqlite::Connection`] exposing key/value semantics.
pub struct KvStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl KvStore {
    /// Open (or create) a store at an explicit path, creating missing
    /// parent directories.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening store");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    /// Filesystem path of the store, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    // ---- Point operations ----

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Delete a key. Returns whether it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(affected > 0)
        })
    }

    // ---- Range operations ----

    /// All entries whose key starts with `prefix`, in ascending key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, ?1) = ?2
                 ORDER BY key ASC",
            )?;

            let rows = stmt.query_map(params![prefix.len() as i64, prefix], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }
            Ok(entries)
        })
    }

    /// Apply every op of `batch` atomically.
    pub fn write(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for op in &batch.ops {
                match op {
                    BatchOp::Put(key, value) => {
                        tx.execute(
                            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                            params![key, value],
                        )?;
                    }
                    BatchOp::Delete(key) => {
                        tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    // ---- Lifecycle ----

    /// Close the underlying connection. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            tracing::info!(path = ?self.path, "store closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        match self.conn.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}
