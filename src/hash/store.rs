// ABOUTME: HashStore - durable last-known content hash per (entity type, global identifier)
// ABOUTME: SQLite-backed; keyed on business identifiers so records survive database re-imports

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entity_hash (
    entity_type   TEXT NOT NULL,
    identifier    TEXT NOT NULL,
    hash          TEXT NOT NULL,
    created_at    TIMESTAMP NOT NULL,
    changed_at    TIMESTAMP,
    PRIMARY KEY (entity_type, identifier)
);
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub entity_type: String,
    pub identifier: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    /// Unset until the first update after creation.
    pub changed_at: Option<DateTime<Utc>>,
}

/// Persistence of last-known entity hashes.
///
/// Implementations guarantee durable writes and read-your-writes, but not
/// atomicity of a lookup followed by an upsert; see [`crate::hash::ChangeGate`].
pub trait HashStore: Send + Sync {
    /// Absence is the normal answer for an entity that was never hashed.
    fn lookup(&self, entity_type: &str, identifier: &str) -> Result<Option<HashRecord>>;

    /// Creates the record or overwrites its hash and stamps `changed_at`.
    fn upsert(&self, entity_type: &str, identifier: &str, hash: &str) -> Result<HashRecord>;

    /// Puts back `previous` exactly as it was read, or removes the record when
    /// there was none.
    fn restore(
        &self,
        entity_type: &str,
        identifier: &str,
        previous: Option<&HashRecord>,
    ) -> Result<()>;
}

pub struct SqliteHashStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteHashStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create hash store directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open hash store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("failed to enable WAL for hash store")?;
        let store = Self::init(conn, Some(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), "opened hash store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory hash store")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize hash store schema")?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entity_hash", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("hash store connection lock poisoned").into())
    }
}

fn select_record(
    conn: &Connection,
    entity_type: &str,
    identifier: &str,
) -> rusqlite::Result<Option<HashRecord>> {
    conn.query_row(
        "SELECT entity_type, identifier, hash, created_at, changed_at
         FROM entity_hash WHERE entity_type = ?1 AND identifier = ?2",
        params![entity_type, identifier],
        |row| {
            Ok(HashRecord {
                entity_type: row.get(0)?,
                identifier: row.get(1)?,
                hash: row.get(2)?,
                created_at: row.get(3)?,
                changed_at: row.get(4)?,
            })
        },
    )
    .optional()
}

impl HashStore for SqliteHashStore {
    fn lookup(&self, entity_type: &str, identifier: &str) -> Result<Option<HashRecord>> {
        let conn = self.conn()?;
        Ok(select_record(&conn, entity_type, identifier)?)
    }

    fn upsert(&self, entity_type: &str, identifier: &str, hash: &str) -> Result<HashRecord> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO entity_hash(entity_type, identifier, hash, created_at, changed_at)
             VALUES (?1, ?2, ?3, ?4, NULL)
             ON CONFLICT(entity_type, identifier) DO UPDATE SET
                hash = excluded.hash,
                changed_at = ?4",
            params![entity_type, identifier, hash, now],
        )
        .with_context(|| format!("failed to save hash for {entity_type} {identifier}"))?;

        select_record(&conn, entity_type, identifier)?
            .ok_or_else(|| anyhow!("hash for {entity_type} {identifier} missing after save").into())
    }

    fn restore(
        &self,
        entity_type: &str,
        identifier: &str,
        previous: Option<&HashRecord>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let restored = match previous {
            Some(record) => conn.execute(
                "INSERT INTO entity_hash(entity_type, identifier, hash, created_at, changed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(entity_type, identifier) DO UPDATE SET
                    hash = excluded.hash,
                    created_at = excluded.created_at,
                    changed_at = excluded.changed_at",
                params![
                    entity_type,
                    identifier,
                    record.hash,
                    record.created_at,
                    record.changed_at
                ],
            ),
            None => conn.execute(
                "DELETE FROM entity_hash WHERE entity_type = ?1 AND identifier = ?2",
                params![entity_type, identifier],
            ),
        };
        restored.with_context(|| format!("failed to restore hash for {entity_type} {identifier}"))?;
        Ok(())
    }
}
