//! Key-value substrate underneath the encrypted store.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Plain string key-value persistence.
///
/// Implementations never see plaintext; the encrypted store hands them
/// serialized envelopes only.
pub trait KeyValueBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Key-value storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE kv_store (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL,        -- JSON envelope
///     updated_at TEXT NOT NULL    -- ISO 8601 timestamp
/// );
/// ```
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Creates or opens the backing database file.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::with_connection(conn)
    }

    /// Non-persistent backend, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create kv_store table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueBackend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read value")
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .execute(
                r#"
                INSERT INTO kv_store (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, now],
            )
            .context("Failed to write value")?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .context("Failed to delete value")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let backend = SqliteBackend::in_memory().unwrap();

        assert!(backend.read("k").unwrap().is_none());

        backend.write("k", "v1").unwrap();
        assert_eq!(backend.read("k").unwrap().as_deref(), Some("v1"));

        // Upsert replaces
        backend.write("k", "v2").unwrap();
        assert_eq!(backend.read("k").unwrap().as_deref(), Some("v2"));

        backend.delete("k").unwrap();
        assert!(backend.read("k").unwrap().is_none());

        // Deleting a missing key is fine
        backend.delete("k").unwrap();
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.write("k", "persisted").unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.read("k").unwrap().as_deref(), Some("persisted"));
    }
}
