use anyhow::{Context, Result};
use serde_json::json;
use sync_queue::SyncQueue;

use crate::config::SyncConfig;

/// Print pending events as JSON lines without removing them from the queue.
pub fn browse(config: &SyncConfig, limit: usize) -> Result<()> {
    let queue = SyncQueue::open(&config.queue.path, &config.queue.name)?;
    let messages = queue.browse(limit)?;
    tracing::info!(
        queue = queue.name(),
        depth = queue.depth()?,
        shown = messages.len(),
        "browsing queue"
    );
    for message in messages {
        let event: serde_json::Value = serde_json::from_str(&message.body)
            .unwrap_or_else(|_| serde_json::Value::String(message.body.clone()));
        let line = json!({
            "messageId": message.message_id,
            "enqueuedAt": message.enqueued_at.to_rfc3339(),
            "event": event,
        });
        println!(
            "{}",
            serde_json::to_string(&line).context("failed to render message")?
        );
    }
    Ok(())
}
