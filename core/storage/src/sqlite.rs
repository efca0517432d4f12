//! SQLite-backed local store.
//!
//! Persists the device's working copy so it survives restarts and is
//! available offline.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use fitsync_common::{EntityId, EntityKind, Error, Record, Result};

use crate::provider::LocalStore;

/// Per-kind record counts, split into live and soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindCount {
    pub kind: EntityKind,
    pub live: usize,
    pub deleted: usize,
}

/// Local store using a single SQLite table keyed by (kind, id).
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

fn db_err(err: rusqlite::Error) -> Error {
    Error::LocalStore(err.to_string())
}

impl SqliteLocalStore {
    /// Create or open a local store database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT,
                deleted_at TEXT,
                PRIMARY KEY (kind, id)
            );
            "#,
        )
        .map_err(db_err)?;

        info!("Local store opened successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::LocalStore("connection lock poisoned".to_string()))
    }

    /// Count records of every kind.
    pub fn counts(&self) -> Result<Vec<KindCount>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 0 ELSE 1 END), 0)
                FROM records WHERE kind = ?1
                "#,
            )
            .map_err(db_err)?;

        let mut counts = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let (live, deleted): (i64, i64) = stmt
                .query_row([kind.wire_name()], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err)?;
            counts.push(KindCount {
                kind,
                live: live as usize,
                deleted: deleted as usize,
            });
        }
        Ok(counts)
    }
}

fn decode(body: String) -> Result<Record> {
    serde_json::from_str(&body).map_err(|e| Error::LocalStore(format!("Corrupt record: {}", e)))
}

impl LocalStore for SqliteLocalStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND id = ?2",
                params![kind.wire_name(), id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        body.map(decode).transpose()
    }

    fn put(&self, kind: EntityKind, record: Record) -> Result<()> {
        debug!("Upserting {} {}", kind, record.id);
        let body = serde_json::to_string(&record)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO records (kind, id, body, updated_at, deleted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                kind.wire_name(),
                record.id.as_str(),
                body,
                record.updated_at.map(|t| t.to_rfc3339()),
                record.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn scan(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT body FROM records WHERE kind = ?1 ORDER BY id")
            .map_err(db_err)?;
        let bodies = stmt
            .query_map([kind.wire_name()], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        bodies.into_iter().map(decode).collect()
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM records", []).map_err(db_err)?;
        info!("Local store cleared");
        Ok(())
    }
}
