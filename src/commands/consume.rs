use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use sync_queue::SyncQueue;

use crate::config::SyncConfig;
use crate::consumer::{
    ConfiguredOperators, ConsumerLifecycle, ConsumerSettings, MessageConsumer, PollingQueue,
    ShutdownOutcome,
};
use crate::replica::ReplicaWriter;

const LIVENESS_CHECK: Duration = Duration::from_secs(1);

/// Run the message consumer until Ctrl+C, applying events to the local replica.
pub fn consume(config: &SyncConfig) -> Result<()> {
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let mut lifecycle = ConsumerLifecycle::new(config.shutdown_grace());
    let operators = ConfiguredOperators::new(config.consumer.operators.clone());
    let settings = ConsumerSettings {
        max_batch: config.queue.max_batch,
        poll_wait: config.queue.poll_wait(),
    };

    lifecycle.on_ready(
        config.consumer.operator_user.as_deref(),
        &operators,
        |identity| {
            let queue = SyncQueue::open(&config.queue.path, &config.queue.name)?;
            let replica = ReplicaWriter::open(&config.replica.path)?;
            Ok(MessageConsumer::new(
                PollingQueue::new(queue, config.queue.poll_interval()),
                replica,
                identity,
                settings,
            ))
        },
    )?;
    tracing::info!(
        "Starting sync message consumer, batch size: {}",
        config.queue.max_batch
    );

    loop {
        match stop_rx.recv_timeout(LIVENESS_CHECK) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !lifecycle.is_running() {
                    tracing::error!("message consumer is no longer running");
                    break;
                }
            }
        }
    }

    tracing::info!("Shutting down message consumer");
    match lifecycle.on_stopping() {
        ShutdownOutcome::Stopped(stats) => {
            println!(
                "Consumer stopped: {} batches, {} applied, {} failed",
                stats.batches, stats.applied, stats.failed
            );
            Ok(())
        }
        ShutdownOutcome::TimedOut | ShutdownOutcome::NotRunning => Ok(()),
        ShutdownOutcome::Failed(reason) => anyhow::bail!("message consumer failed: {}", reason),
    }
}
