// ABOUTME: ReplicaWriter - applies received sync events to the local SQLite replica
// ABOUTME: Inserts/updates upsert the JSON payload, deletes remove the row

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sync_queue::{SyncEvent, SyncOperation};

use crate::consumer::{ApplyContext, EventHandler};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS replica_rows (
    table_name          TEXT NOT NULL,
    global_identifier   TEXT NOT NULL,
    payload             TEXT NOT NULL,
    source_site         TEXT NOT NULL,
    applied_by          TEXT NOT NULL,
    applied_at          TIMESTAMP NOT NULL,
    PRIMARY KEY (table_name, global_identifier)
);
"#;

pub struct ReplicaWriter {
    conn: Connection,
}

impl ReplicaWriter {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create replica directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open replica database {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize replica schema")?;
        Ok(Self { conn })
    }

    pub fn upsert(&self, event: &SyncEvent, applied_by: &str) -> Result<()> {
        let payload = event.payload.as_ref().ok_or_else(|| {
            anyhow!(
                "{} event for {} {} has no payload",
                event.operation,
                event.table_name,
                event.global_identifier
            )
        })?;
        self.conn
            .execute(
                "INSERT INTO replica_rows(table_name, global_identifier, payload, source_site, applied_by, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(table_name, global_identifier) DO UPDATE SET
                    payload = excluded.payload,
                    source_site = excluded.source_site,
                    applied_by = excluded.applied_by,
                    applied_at = excluded.applied_at",
                params![
                    event.table_name,
                    event.global_identifier,
                    payload.to_string(),
                    event.source_site,
                    applied_by,
                    Utc::now(),
                ],
            )
            .with_context(|| {
                format!(
                    "failed to upsert {} {}",
                    event.table_name, event.global_identifier
                )
            })?;
        Ok(())
    }

    /// Removes the row; returns whether anything was deleted.
    pub fn delete(&self, table_name: &str, global_identifier: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM replica_rows WHERE table_name = ?1 AND global_identifier = ?2",
                params![table_name, global_identifier],
            )
            .with_context(|| format!("failed to delete {table_name} {global_identifier}"))?;
        Ok(deleted > 0)
    }

    pub fn get(&self, table_name: &str, global_identifier: &str) -> Result<Option<Value>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM replica_rows WHERE table_name = ?1 AND global_identifier = ?2",
                params![table_name, global_identifier],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|raw| serde_json::from_str(&raw).context("corrupt replica payload"))
            .transpose()
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM replica_rows", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl EventHandler for ReplicaWriter {
    fn apply(&mut self, ctx: &ApplyContext<'_>, event: &SyncEvent) -> Result<()> {
        match event.operation {
            SyncOperation::Insert | SyncOperation::Update => {
                self.upsert(event, &ctx.identity.uuid)
            }
            SyncOperation::Delete => {
                if !self.delete(&event.table_name, &event.global_identifier)? {
                    tracing::debug!(
                        table = %event.table_name,
                        identifier = %event.global_identifier,
                        "delete for a row that is not in the replica"
                    );
                }
                Ok(())
            }
        }
    }
}
