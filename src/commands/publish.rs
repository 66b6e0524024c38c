use std::path::Path;

use anyhow::Result;
use sync_queue::SyncOperation;

use crate::config::SyncConfig;

pub fn publish(
    config: &SyncConfig,
    entity: &str,
    identifier: &str,
    operation: SyncOperation,
    file: Option<&Path>,
) -> Result<()> {
    let snapshot = super::read_snapshot(entity, file)?;
    let publisher = super::open_publisher(config)?;
    match publisher.publish(operation, identifier, &snapshot)? {
        Some(message_id) => {
            let hash = publisher.gate().canonicalizer().hash(&snapshot)?;
            println!("changed {} (message {})", hash, message_id);
        }
        None => println!("unchanged"),
    }
    Ok(())
}

pub fn delete(config: &SyncConfig, entity: &str, identifier: &str) -> Result<()> {
    let publisher = super::open_publisher(config)?;
    let message_id = publisher.publish_delete(entity, identifier)?;
    println!("queued delete (message {})", message_id);
    Ok(())
}
