// ABOUTME: Command implementations for the dbsync CLI
// ABOUTME: Exports hash, publish, browse and consume commands plus shared wiring

pub mod browse;
pub mod consume;
pub mod hash;
pub mod publish;

pub use browse::browse;
pub use consume::consume;
pub use hash::{hash, hash_file};
pub use publish::{delete, publish};

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sync_queue::SyncQueue;

use crate::config::SyncConfig;
use crate::hash::{Canonicalizer, ChangeGate, EntitySnapshot, SqliteHashStore};
use crate::publisher::SyncPublisher;

/// Read a JSON snapshot from `file`, or from stdin when no file is given.
pub(crate) fn read_snapshot(entity_type: &str, file: Option<&Path>) -> Result<EntitySnapshot> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read snapshot from stdin")?;
            buf
        }
    };
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("snapshot is not valid JSON")?;
    Ok(EntitySnapshot::from_json(entity_type, &value)?)
}

pub(crate) fn canonicalizer(config: &SyncConfig) -> Result<Canonicalizer> {
    let registry = config.entity_registry()?;
    Ok(Canonicalizer::new(Arc::new(registry)))
}

pub(crate) fn open_publisher(config: &SyncConfig) -> Result<SyncPublisher<SqliteHashStore>> {
    let store = SqliteHashStore::open(&config.hash_store.path)?;
    let gate = ChangeGate::new(canonicalizer(config)?, Arc::new(store));
    let queue = SyncQueue::open(&config.queue.path, &config.queue.name)?;
    Ok(SyncPublisher::new(gate, queue, &config.site.id))
}
