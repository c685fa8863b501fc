//! Durable key-value store backing the asset cache.
//!
//! One SQLite file per cache directory holds a single `assets` table mapping
//! a SHA-512 hex key to a JSON-encoded [`crate::RuntimeAsset`]. The database
//! runs in WAL mode so any number of readers proceed while one writer holds
//! a `BEGIN IMMEDIATE` transaction; SQLite's write lock is what serializes
//! writers, in this process and in any other process sharing the file.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{AssetError, Result};

pub const INDEX_FILENAME: &str = "assets.db";

pub struct AssetStore {
    path: PathBuf,
    busy_timeout: Duration,
    closed: AtomicBool,
}

impl AssetStore {
    /// Open the store in `root`, creating the directory, database file and
    /// schema as needed.
    pub fn open(root: &Path, busy_timeout: Duration) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            AssetError::Store(format!("failed to create {}: {}", root.display(), e))
        })?;

        let store = Self {
            path: root.join(INDEX_FILENAME),
            busy_timeout,
            closed: AtomicBool::new(false),
        };

        let conn = store.connection()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!("Asset store is running in {} journal mode", mode);
        }
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        log::debug!("Opened asset store at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the store. Later operations fail with a store error.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.connection()?;
        // Fold the WAL back into the main file so the store is self-contained.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        self.closed.store(true, Ordering::Release);
        log::debug!("Closed asset store at {}", self.path.display());
        Ok(())
    }

    /// Read-only lookup; runs concurrently with other readers and the writer.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection()?;
        conn.pragma_update(None, "query_only", true)?;
        select_value(&conn, key)
    }

    /// Insert or replace a single record in its own short transaction.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.begin_write()?;
        txn.put(key, value)?;
        txn.commit()
    }

    /// All records, ordered by key.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT key, value FROM assets ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Begin an exclusive write transaction.
    ///
    /// Blocks until every other writer has finished, or fails once the busy
    /// timeout elapses. The transaction rolls back unless committed.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let conn = self.connection()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(WriteTxn { conn, done: false })
    }

    fn connection(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(AssetError::Store(format!(
                "store {} is closed",
                self.path.display()
            )));
        }
        let conn = Connection::open(&self.path).map_err(|e| {
            AssetError::Store(format!("failed to open {}: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

/// An open `BEGIN IMMEDIATE` transaction.
pub struct WriteTxn {
    conn: Connection,
    done: bool,
}

impl WriteTxn {
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        select_value(&self.conn, key)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO assets(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("Failed to roll back asset store transaction: {}", e);
            }
        }
    }
}

fn select_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM assets WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> AssetStore {
        AssetStore::open(dir.path(), Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn test_open_creates_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/cache");
        let store = AssetStore::open(&root, Duration::from_secs(1)).unwrap();
        assert!(root.is_dir());
        assert!(store.path().exists());
    }

    #[test]
    fn test_put_get_list() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert_eq!(store.get("b").unwrap(), None);
        store.put("b", "{\"Path\":\"/b\"}").unwrap();
        store.put("a", "{\"Path\":\"/a\"}").unwrap();
        store.put("b", "{\"Path\":\"/b2\"}").unwrap();

        assert_eq!(store.get("b").unwrap().as_deref(), Some("{\"Path\":\"/b2\"}"));
        let keys: Vec<String> = store.list().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        {
            let txn = store.begin_write().unwrap();
            txn.put("k", "v").unwrap();
            assert_eq!(txn.get("k").unwrap().as_deref(), Some("v"));
        }

        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_second_writer_waits_for_first() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let first = store.begin_write().unwrap();
        let second = store.begin_write();
        assert!(second.is_err(), "second writer must not start while first is open");

        // Readers are not blocked by the open writer.
        assert_eq!(store.get("k").unwrap(), None);

        first.commit().unwrap();
        assert!(store.begin_write().is_ok());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.put("k", "v").unwrap();
            store.close().unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get("k"), Err(AssetError::Store(_))));
        assert!(store.begin_write().is_err());
    }
}
