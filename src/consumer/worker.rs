//! Background consume task per subscriber channel.
//!
//! Calls `consume_once` until stopped. The stop signal is only observed
//! between cycles, so a running handler is never interrupted. Failed cycles
//! are retried on an exponential backoff that resets after the next
//! successful cycle.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ConsumeLoop;

/// Pause after a cycle that returned nothing.
const IDLE_PAUSE: Duration = Duration::from_millis(100);

/// Longest pause between failed cycles.
const MAX_ERROR_DELAY: Duration = Duration::from_secs(30);

/// Backoff between failed consume cycles.
///
/// - Min delay: 100ms
/// - Max delay: 30s
/// - Jitter enabled
fn cycle_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(MAX_ERROR_DELAY)
        .with_max_times(usize::MAX)
        .with_jitter()
}

/// Handle to a running consumer task.
pub struct ConsumerTaskHandle {
    channel: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerTaskHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Signal the task to stop after its current cycle.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            error!(channel = %self.channel, error = %e, "Consumer task ended abnormally");
        }
    }
}

/// Stop a set of consumers, signalling all of them before awaiting any.
///
/// A worker only sees the stop between cycles, so each may still finish a
/// long poll; signalling first lets those polls run out together.
pub async fn shutdown_all(handles: Vec<ConsumerTaskHandle>) {
    for handle in &handles {
        handle.stop();
    }
    for handle in handles {
        handle.shutdown().await;
    }
}

/// Spawn a task running consume cycles on `channel` until stopped.
pub fn spawn_consumer(
    consume_loop: Arc<ConsumeLoop>,
    channel: impl Into<String>,
    max_messages: i32,
) -> ConsumerTaskHandle {
    let channel = channel.into();
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let task_channel = channel.clone();
    let task = tokio::spawn(async move {
        info!(channel = %task_channel, "Consumer started");
        let mut delays = cycle_backoff().build();

        while !*cancel_rx.borrow() {
            let pause = match consume_loop.consume_once(&task_channel, max_messages).await {
                Ok(consumed) => {
                    delays = cycle_backoff().build();
                    (consumed == 0).then_some(IDLE_PAUSE)
                }
                Err(e) => {
                    let delay = delays.next().unwrap_or(MAX_ERROR_DELAY);
                    error!(
                        channel = %task_channel,
                        error = %e,
                        retry_in = ?delay,
                        "Consume cycle failed"
                    );
                    Some(delay)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = cancel_rx.changed() => {
                        // Handle dropped: treat as stop.
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(channel = %task_channel, "Consumer stopped");
    });

    ConsumerTaskHandle {
        channel,
        cancel: cancel_tx,
        task,
    }
}
