use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::StoreResult;
use crate::record::RecordKind;

use super::StoreBackend;

/// Local device storage in a single SQLite file.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.migrate()?;
        Ok(backend)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let backend = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.migrate()?;
        Ok(backend)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                record_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (kind, record_key)
            );
            "#,
            )
            .context("failed to migrate record schema")?;
        Ok(())
    }
}

impl StoreBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn get_all(&self, kind: RecordKind) -> StoreResult<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT record_key, payload FROM records WHERE kind = ?1")?;
        let rows = stmt.query_map(params![kind.storage_name()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (key, payload) = row?;
            out.insert(key, payload);
        }
        Ok(out)
    }

    fn get(&self, kind: RecordKind, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let payload = conn
            .query_row(
                "SELECT payload FROM records WHERE kind = ?1 AND record_key = ?2",
                params![kind.storage_name(), key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put(&self, kind: RecordKind, key: &str, payload: &str) -> StoreResult<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO records (kind, record_key, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(kind, record_key) DO UPDATE SET
                payload = excluded.payload
            "#,
            params![kind.storage_name(), key, payload],
        )?;
        Ok(())
    }

    fn delete(&self, kind: RecordKind, key: &str) -> StoreResult<()> {
        self.conn.lock().execute(
            "DELETE FROM records WHERE kind = ?1 AND record_key = ?2",
            params![kind.storage_name(), key],
        )?;
        Ok(())
    }

    /// One statement in one transaction: either every row of `kind` goes or none does.
    fn clear(&self, kind: RecordKind) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM records WHERE kind = ?1",
            params![kind.storage_name()],
        )?;
        tx.commit()?;
        debug!(%kind, removed, "sqlite clear committed");
        Ok(())
    }
}
