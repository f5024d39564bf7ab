//! SQLite persistence backend.

use hubsync_core::kv::{prefix_end, BatchOp};
use hubsync_core::{KvError, KvStore, WriteBatch};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Params, Result as SqliteResult};
use std::fmt;
use std::path::Path;

/// [`KvStore`] over one SQLite table.
///
/// Keys are BLOBs, which SQLite compares with `memcmp`, so range scans come
/// back in lexicographic byte order.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl fmt::Debug for SqliteKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteKv").finish_non_exhaustive()
    }
}

impl SqliteKv {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SqliteResult<()> {
        self.conn.lock().execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            );
            ",
        )
    }

    /// Number of stored keys.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub fn len(&self) -> SqliteResult<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Whether no key is stored.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub fn is_empty(&self) -> SqliteResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn backend(err: rusqlite::Error) -> KvError {
    KvError::Backend(err.to_string())
}

impl KvStore for SqliteKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(backend)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KvError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(backend)?;
        {
            let mut put = tx
                .prepare_cached("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                .map_err(backend)?;
            let mut delete = tx
                .prepare_cached("DELETE FROM kv WHERE key = ?1")
                .map_err(backend)?;
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put(key, value) => put.execute((key, value)).map_err(backend)?,
                    BatchOp::Delete(key) => delete.execute([key]).map_err(backend)?,
                };
            }
        }
        // Dropping an uncommitted transaction rolls it back.
        tx.commit().map_err(backend)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let conn = self.conn.lock();
        match prefix_end(prefix) {
            Some(end) => query_entries(
                &conn,
                r"
                SELECT key, value FROM kv
                WHERE key >= ?1 AND key < ?2
                ORDER BY key ASC
                ",
                (prefix, end),
            ),
            None => query_entries(
                &conn,
                "SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key ASC",
                [prefix],
            ),
        }
        .map_err(backend)
    }
}

fn query_entries<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> SqliteResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let entries = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<SqliteResult<Vec<(Vec<u8>, Vec<u8>)>>>()?;
    Ok(entries)
}
