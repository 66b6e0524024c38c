// ABOUTME: SyncPublisher - turns gate decisions into sync events on the outbound queue
// ABOUTME: Inserts and updates pass through the ChangeGate; deletes bypass hashing

use std::sync::Mutex;

use anyhow::anyhow;
use sync_queue::{SyncEvent, SyncOperation, SyncQueue};

use crate::error::Result;
use crate::hash::{ChangeGate, Decision, EntitySnapshot, HashStore};

pub struct SyncPublisher<S> {
    gate: ChangeGate<S>,
    queue: Mutex<SyncQueue>,
    source_site: String,
}

impl<S: HashStore> SyncPublisher<S> {
    pub fn new(gate: ChangeGate<S>, queue: SyncQueue, source_site: &str) -> Self {
        Self {
            gate,
            queue: Mutex::new(queue),
            source_site: source_site.to_string(),
        }
    }

    pub fn gate(&self) -> &ChangeGate<S> {
        &self.gate
    }

    /// Publish the current state of an entity.
    ///
    /// Returns the queued message id, or `None` when the gate found the
    /// entity unchanged and nothing was sent.
    pub fn publish(
        &self,
        operation: SyncOperation,
        identifier: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<Option<i64>> {
        let entity_type = snapshot.entity_type();
        if operation == SyncOperation::Delete {
            return self.publish_delete(entity_type, identifier).map(Some);
        }

        let (decision, previous) = self.gate.evaluate_tracked(entity_type, identifier, snapshot)?;
        let hash = match decision {
            Decision::Unchanged => return Ok(None),
            Decision::Changed(hash) => hash,
        };

        let message_id = match self.enqueue_change(operation, identifier, snapshot) {
            Ok(message_id) => message_id,
            Err(err) => {
                // Put the old hash back so the next attempt for this state is sent.
                tracing::error!(
                    entity_type,
                    identifier,
                    hash = %hash,
                    "sync event could not be queued, reverting stored hash: {}",
                    err
                );
                if let Err(revert_err) =
                    self.gate.revert(entity_type, identifier, previous.as_ref())
                {
                    tracing::error!(
                        entity_type,
                        identifier,
                        "failed to revert stored hash, change will not be resent: {}",
                        revert_err
                    );
                }
                return Err(err);
            }
        };
        tracing::info!(
            entity_type,
            identifier,
            operation = %operation,
            message_id,
            "queued sync event"
        );
        Ok(Some(message_id))
    }

    fn enqueue_change(
        &self,
        operation: SyncOperation,
        identifier: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<i64> {
        let descriptor = self
            .gate
            .canonicalizer()
            .registry()
            .require(snapshot.entity_type())?;
        let event = SyncEvent {
            table_name: descriptor.table().to_string(),
            operation,
            source_site: self.source_site.clone(),
            global_identifier: identifier.to_string(),
            payload: Some(snapshot.to_json()),
        };
        self.enqueue(&event)
    }

    /// Queue a delete. There is no post-state to hash, and the stored hash
    /// record is left as is.
    pub fn publish_delete(&self, entity_type: &str, identifier: &str) -> Result<i64> {
        let descriptor = self.gate.canonicalizer().registry().require(entity_type)?;
        let event = SyncEvent::delete(descriptor.table(), &self.source_site, identifier);
        let message_id = self.enqueue(&event)?;
        tracing::info!(entity_type, identifier, message_id, "queued delete event");
        Ok(message_id)
    }

    fn enqueue(&self, event: &SyncEvent) -> Result<i64> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| anyhow!("outbound queue lock poisoned"))?;
        Ok(queue.enqueue(event)?)
    }
}
