// ABOUTME: ConsumerLifecycle - binds the message consumer thread to process ready/stopping signals
// ABOUTME: Starts exactly one consumer thread and bounds how long shutdown waits for it

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;

use super::identity::{resolve_operator, IdentityResolver, OperatorIdentity};
use super::message_consumer::{
    ConsumerState, ConsumerStats, EventHandler, MessageConsumer, MessageSource, StateCell,
    StopToken,
};
use crate::error::{Result, SyncError};

const THREAD_NAME: &str = "sync-message-consumer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The consumer finished its batch and exited cleanly.
    Stopped(ConsumerStats),
    /// The consumer thread had already died from a loop-level error or panic.
    Failed(String),
    /// The grace period elapsed first; the thread is left to die with the process.
    TimedOut,
    NotRunning,
}

/// Marks the consumer stopped when its thread exits, including by panic.
struct MarkStopped(StateCell);

impl Drop for MarkStopped {
    fn drop(&mut self) {
        self.0.set(ConsumerState::Stopped);
    }
}

struct RunningConsumer {
    stop: StopToken,
    done: Receiver<Result<ConsumerStats>>,
    thread: JoinHandle<()>,
}

pub struct ConsumerLifecycle {
    grace: Duration,
    state: StateCell,
    running: Option<RunningConsumer>,
}

impl ConsumerLifecycle {
    /// `grace` bounds the wait in [`ConsumerLifecycle::on_stopping`]; it should
    /// cover one poll wait plus a margin.
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            state: StateCell::default(),
            running: None,
        }
    }

    /// Handle the "system ready" signal.
    ///
    /// Resolves the operator identity, builds the consumer with it and starts
    /// it on a dedicated thread. Fails with [`SyncError::Configuration`] when
    /// the identity cannot be resolved and with [`SyncError::AlreadyRunning`]
    /// when called again before [`ConsumerLifecycle::on_stopping`].
    pub fn on_ready<S, H, F>(
        &mut self,
        operator_user: Option<&str>,
        resolver: &dyn IdentityResolver,
        build: F,
    ) -> Result<()>
    where
        S: MessageSource + Send + 'static,
        H: EventHandler + Send + 'static,
        F: FnOnce(OperatorIdentity) -> Result<MessageConsumer<S, H>>,
    {
        if self.running.is_some() {
            return Err(SyncError::AlreadyRunning);
        }

        let identity = resolve_operator(operator_user, resolver)?;
        let mut consumer = build(identity)?;
        self.state = consumer.state();

        let stop = StopToken::new();
        let thread_stop = stop.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let exit_marker = MarkStopped(self.state.clone());
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let _exit_marker = exit_marker;
                let result = consumer.run(&thread_stop);
                if let Err(err) = &result {
                    // Not restarted; stays down until the process restarts.
                    tracing::error!("message consumer terminated: {}", err);
                }
                let _ = done_tx.send(result);
            })
            .context("failed to spawn message consumer thread")?;

        tracing::debug!("started sync message consumer");
        self.running = Some(RunningConsumer {
            stop,
            done: done_rx,
            thread,
        });
        Ok(())
    }

    /// Handle the "system stopping" signal.
    ///
    /// Never blocks longer than the grace period and never panics; a consumer
    /// that does not stop in time is reported and abandoned.
    pub fn on_stopping(&mut self) -> ShutdownOutcome {
        let Some(running) = self.running.take() else {
            return ShutdownOutcome::NotRunning;
        };

        running.stop.cancel();
        tracing::info!(
            "Waiting for {} seconds for message consumer thread to terminate",
            self.grace.as_secs()
        );

        match running.done.recv_timeout(self.grace) {
            Ok(Ok(stats)) => {
                let _ = running.thread.join();
                tracing::info!("The message consumer thread has successfully terminated");
                ShutdownOutcome::Stopped(stats)
            }
            Ok(Err(err)) => {
                let _ = running.thread.join();
                ShutdownOutcome::Failed(err.to_string())
            }
            Err(RecvTimeoutError::Timeout) => {
                let err = SyncError::ShutdownTimeout {
                    waited_secs: self.grace.as_secs(),
                };
                tracing::warn!("{}; continuing shutdown", err);
                ShutdownOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = running.thread.join();
                tracing::error!("message consumer thread panicked");
                ShutdownOutcome::Failed("message consumer thread panicked".to_string())
            }
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.thread.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ConsumerLifecycle {
    fn drop(&mut self) {
        if let Some(running) = self.running.as_ref() {
            running.stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::identity::ConfiguredOperators;
    use crate::consumer::message_consumer::ConsumerSettings;

    #[test]
    fn test_stopping_before_ready_is_noop() {
        let mut lifecycle = ConsumerLifecycle::new(Duration::from_secs(1));
        assert_eq!(lifecycle.on_stopping(), ShutdownOutcome::NotRunning);
        assert!(!lifecycle.is_running());
        assert_eq!(lifecycle.state(), ConsumerState::Idle);
    }

    struct OneMessage(Option<sync_queue::QueuedMessage>);

    impl MessageSource for OneMessage {
        fn poll(
            &mut self,
            _max: usize,
            wait: Duration,
        ) -> anyhow::Result<Vec<sync_queue::QueuedMessage>> {
            match self.0.take() {
                Some(message) => Ok(vec![message]),
                None => {
                    thread::sleep(wait);
                    Ok(Vec::new())
                }
            }
        }
    }

    struct PanickingHandler;

    impl EventHandler for PanickingHandler {
        fn apply(
            &mut self,
            _ctx: &crate::consumer::message_consumer::ApplyContext<'_>,
            _event: &sync_queue::SyncEvent,
        ) -> anyhow::Result<()> {
            panic!("handler bug");
        }
    }

    fn operators() -> ConfiguredOperators {
        ConfiguredOperators::new(vec![crate::consumer::identity::OperatorAccount {
            username: "admin".into(),
            uuid: "op-1".into(),
        }])
    }

    #[test]
    fn test_missing_operator_aborts_startup() {
        let mut lifecycle = ConsumerLifecycle::new(Duration::from_secs(1));
        let result = lifecycle.on_ready(
            None,
            &ConfiguredOperators::default(),
            |_identity| -> Result<MessageConsumer<OneMessage, PanickingHandler>> {
                panic!("consumer must not be built without an operator")
            },
        );
        assert!(matches!(result, Err(SyncError::Configuration(_))));
        assert!(!lifecycle.is_running());
    }

    #[test]
    fn test_panicked_consumer_reports_stopped() {
        let message = sync_queue::QueuedMessage {
            message_id: 1,
            body: sync_queue::SyncEvent::delete("person", "central", "p-1")
                .to_body()
                .unwrap(),
            enqueued_at: chrono::Utc::now(),
        };
        let mut lifecycle = ConsumerLifecycle::new(Duration::from_secs(2));
        lifecycle
            .on_ready(Some("admin"), &operators(), |identity| {
                Ok(MessageConsumer::new(
                    OneMessage(Some(message)),
                    PanickingHandler,
                    identity,
                    ConsumerSettings {
                        max_batch: 10,
                        poll_wait: Duration::from_millis(20),
                    },
                ))
            })
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while lifecycle.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(lifecycle.state(), ConsumerState::Stopped);
        match lifecycle.on_stopping() {
            ShutdownOutcome::Failed(reason) => assert!(reason.contains("panicked")),
            other => panic!("unexpected shutdown outcome: {other:?}"),
        }
    }
}
