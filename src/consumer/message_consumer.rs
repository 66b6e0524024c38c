// ABOUTME: MessageConsumer - batch-pull loop draining sync events from the queue
// ABOUTME: Applies events in receipt order, isolates per-event failures, stops cooperatively

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sync_queue::{QueuedMessage, SyncEvent, SyncQueue};

use super::identity::OperatorIdentity;
use crate::error::{Result, SyncError};

/// Cooperative cancellation shared between the consumer thread and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    cancelled: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    Idle = 0,
    Polling = 1,
    Processing = 2,
    Draining = 3,
    Stopped = 4,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConsumerState::Polling,
            2 => ConsumerState::Processing,
            3 => ConsumerState::Draining,
            4 => ConsumerState::Stopped,
            _ => ConsumerState::Idle,
        }
    }
}

/// Observable consumer state, readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn get(&self) -> ConsumerState {
        ConsumerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(super) fn set(&self, state: ConsumerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Source of pending sync events. `poll` waits up to `wait` for at least one
/// message and returns an empty batch when none arrived in time.
pub trait MessageSource {
    fn poll(&mut self, max: usize, wait: Duration) -> anyhow::Result<Vec<QueuedMessage>>;
}

/// Polls a [`SyncQueue`] with destructive dequeues, sleeping between attempts.
pub struct PollingQueue {
    queue: SyncQueue,
    poll_interval: Duration,
}

impl PollingQueue {
    pub fn new(queue: SyncQueue, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }
}

impl MessageSource for PollingQueue {
    fn poll(&mut self, max: usize, wait: Duration) -> anyhow::Result<Vec<QueuedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let batch = self.queue.dequeue(max)?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

pub struct ApplyContext<'a> {
    pub identity: &'a OperatorIdentity,
    pub message_id: i64,
}

/// A message that could not be applied, handed back with its cause so the
/// caller can retry, dead-letter or drop it.
#[derive(Debug)]
pub struct ApplyFailure {
    pub message: QueuedMessage,
    /// `None` when the body could not be decoded.
    pub event: Option<SyncEvent>,
    pub error: SyncError,
}

pub trait EventHandler {
    fn apply(&mut self, ctx: &ApplyContext<'_>, event: &SyncEvent) -> anyhow::Result<()>;

    fn on_failure(&mut self, failure: ApplyFailure) {
        tracing::error!(
            message_id = failure.message.message_id,
            body = %failure.message.body,
            "{}",
            failure.error
        );
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub batches: u64,
    pub applied: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub max_batch: usize,
    pub poll_wait: Duration,
}

pub struct MessageConsumer<S, H> {
    source: S,
    handler: H,
    identity: OperatorIdentity,
    settings: ConsumerSettings,
    state: StateCell,
}

impl<S: MessageSource, H: EventHandler> MessageConsumer<S, H> {
    pub fn new(
        source: S,
        handler: H,
        identity: OperatorIdentity,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            source,
            handler,
            identity,
            settings,
            state: StateCell::default(),
        }
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run until `stop` is observed between batches.
    ///
    /// A batch that has been pulled is always processed to the end. Errors from
    /// individual events go to [`EventHandler::on_failure`]; an error from the
    /// source itself ends the loop and is returned.
    pub fn run(&mut self, stop: &StopToken) -> Result<ConsumerStats> {
        let mut stats = ConsumerStats::default();
        tracing::info!(
            operator = %self.identity.username,
            max_batch = self.settings.max_batch,
            "message consumer started"
        );

        while !stop.is_cancelled() {
            self.state.set(ConsumerState::Polling);
            let batch = match self
                .source
                .poll(self.settings.max_batch, self.settings.poll_wait)
            {
                Ok(batch) => batch,
                Err(err) => {
                    self.state.set(ConsumerState::Stopped);
                    return Err(SyncError::Store(err.context("failed to poll sync queue")));
                }
            };

            if batch.is_empty() {
                self.state.set(ConsumerState::Idle);
                continue;
            }

            self.state.set(ConsumerState::Processing);
            stats.batches += 1;
            tracing::debug!(size = batch.len(), "processing batch");
            for message in batch {
                if stop.is_cancelled() && self.state.get() != ConsumerState::Draining {
                    tracing::info!("stop requested, finishing current batch");
                    self.state.set(ConsumerState::Draining);
                }
                if self.process(message) {
                    stats.applied += 1;
                } else {
                    stats.failed += 1;
                }
            }
            self.state.set(ConsumerState::Idle);
        }

        self.state.set(ConsumerState::Draining);
        tracing::info!(
            batches = stats.batches,
            applied = stats.applied,
            failed = stats.failed,
            "message consumer stopped"
        );
        self.state.set(ConsumerState::Stopped);
        Ok(stats)
    }

    fn process(&mut self, message: QueuedMessage) -> bool {
        let event = match message.event() {
            Ok(event) => event,
            Err(err) => {
                let error = SyncError::Apply {
                    message_id: message.message_id,
                    source: err,
                };
                self.handler.on_failure(ApplyFailure {
                    message,
                    event: None,
                    error,
                });
                return false;
            }
        };

        let ctx = ApplyContext {
            identity: &self.identity,
            message_id: message.message_id,
        };
        match self.handler.apply(&ctx, &event) {
            Ok(()) => {
                tracing::debug!(
                    message_id = message.message_id,
                    table = %event.table_name,
                    operation = %event.operation,
                    identifier = %event.global_identifier,
                    "applied sync event"
                );
                true
            }
            Err(err) => {
                let error = SyncError::Apply {
                    message_id: message.message_id,
                    source: err,
                };
                self.handler.on_failure(ApplyFailure {
                    message,
                    event: Some(event),
                    error,
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_cell_round_trips() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), ConsumerState::Idle);
        for state in [
            ConsumerState::Polling,
            ConsumerState::Processing,
            ConsumerState::Draining,
            ConsumerState::Stopped,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn test_stop_token_is_shared() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_polling_queue_returns_empty_after_wait() {
        let dir = tempdir().unwrap();
        let queue = SyncQueue::open(dir.path().join("q.db"), "inbound").unwrap();
        let mut source = PollingQueue::new(queue, Duration::from_millis(10));
        let start = Instant::now();
        let batch = source.poll(10, Duration::from_millis(60)).unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_polling_queue_returns_pending_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.db");
        let producer = SyncQueue::open(&path, "inbound").unwrap();
        producer
            .enqueue(&SyncEvent::delete("person", "central", "p-1"))
            .unwrap();
        let mut source =
            PollingQueue::new(SyncQueue::open(&path, "inbound").unwrap(), Duration::from_secs(1));
        let batch = source.poll(10, Duration::from_secs(30)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(producer.depth().unwrap(), 0);
    }
}
