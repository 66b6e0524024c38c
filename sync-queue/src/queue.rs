use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::event::SyncEvent;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_name    TEXT NOT NULL,
    body          TEXT NOT NULL,
    enqueued_at   TIMESTAMP NOT NULL
);

CREATE INDEX IF NOT EXISTS messages_queue_order ON messages(queue_name, message_id);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A message as stored on the queue. The body is kept raw so that a malformed
/// message can still be handed back to the caller for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: i64,
    pub body: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn event(&self) -> Result<SyncEvent> {
        SyncEvent::from_body(&self.body)
            .with_context(|| format!("malformed sync event body in message {}", self.message_id))
    }
}

/// Durable FIFO queue backed by a SQLite file. One file may hold several named
/// queues; every handle is bound to exactly one of them.
pub struct SyncQueue {
    path: PathBuf,
    name: String,
    conn: Connection,
}

impl SyncQueue {
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path = path.as_ref();
        if name.trim().is_empty() {
            bail!("queue name cannot be empty");
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create queue directory {}", parent.display())
                })?;
                #[cfg(unix)]
                set_owner_perms(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open queue database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set busy timeout for sync queue")?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("failed to enable WAL for sync queue")?;
        conn.pragma_update(None, "synchronous", "normal").ok();
        conn.execute_batch(SCHEMA)
            .context("failed to initialize queue schema")?;
        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            conn,
        })
    }

    pub fn enqueue(&self, event: &SyncEvent) -> Result<i64> {
        let body = event.to_body().context("failed to serialize sync event")?;
        self.conn
            .execute(
                "INSERT INTO messages(queue_name, body, enqueued_at) VALUES (?1, ?2, ?3)",
                params![self.name, body, Utc::now()],
            )
            .with_context(|| format!("failed to enqueue on {}", self.name))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Non-destructive peek at the oldest `limit` messages.
    pub fn browse(&self, limit: usize) -> Result<Vec<QueuedMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, body, enqueued_at
             FROM messages
             WHERE queue_name = ?1
             ORDER BY message_id ASC
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![self.name, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(QueuedMessage {
                message_id: row.get(0)?,
                body: row.get(1)?,
                enqueued_at: row.get(2)?,
            });
        }
        Ok(out)
    }

    /// Removes and returns up to `limit` of the oldest messages, in FIFO order.
    /// Messages are gone from the queue once this returns.
    pub fn dequeue(&self, limit: usize) -> Result<Vec<QueuedMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Take the write lock before reading so a concurrent enqueue cannot
        // invalidate the read and fail the delete with SQLITE_BUSY.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("failed to begin dequeue transaction")?;
        let batch = self.browse(limit)?;
        if let Some(last) = batch.last() {
            // every older message in this queue is part of the batch
            tx.execute(
                "DELETE FROM messages WHERE queue_name = ?1 AND message_id <= ?2",
                params![self.name, last.message_id],
            )?;
        }
        tx.commit().context("failed to commit dequeue")?;
        Ok(batch)
    }

    pub fn depth(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE queue_name = ?1",
            [&self.name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn set_owner_perms(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SyncOperation;
    use tempfile::tempdir;

    #[test]
    fn malformed_body_reports_message_id() {
        let message = QueuedMessage {
            message_id: 7,
            body: "not json".into(),
            enqueued_at: Utc::now(),
        };
        let err = message.event().unwrap_err();
        assert!(err.to_string().contains("message 7"));
    }

    #[test]
    fn rejects_blank_queue_name() {
        let dir = tempdir().unwrap();
        assert!(SyncQueue::open(dir.path().join("q.db"), "  ").is_err());
    }

    #[test]
    fn dequeue_zero_is_a_noop() {
        let dir = tempdir().unwrap();
        let queue = SyncQueue::open(dir.path().join("q.db"), "sync").unwrap();
        queue
            .enqueue(&SyncEvent::delete("person", "site", "id-1"))
            .unwrap();
        assert!(queue.dequeue(0).unwrap().is_empty());
        assert_eq!(queue.depth().unwrap(), 1);
        let batch = queue.dequeue(5).unwrap();
        assert_eq!(batch[0].event().unwrap().operation, SyncOperation::Delete);
    }
}
