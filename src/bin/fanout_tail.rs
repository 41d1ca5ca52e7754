//! fanout-tail: Queue tail
//!
//! Consumes every channel listed under `tail.channels` and logs each message
//! it receives. Messages are acknowledged after logging.
//!
//! ## Architecture
//! ```text
//! [queue <channel>] --(long poll)--> [fanout-tail] --> tracing output
//! ```
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - FANOUT_CONFIG: path to a YAML config file (optional)
//! - FANOUT__*: overrides for individual keys
//! - FANOUT_LOG: tracing filter (default: info)

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fanout_fabric::config::Config;
use fanout_fabric::consumer::{shutdown_all, ConsumerHandler, HandlerError, HandlerRegistry};
use fanout_fabric::envelope::Consumable;
use fanout_fabric::utils::bootstrap::init_tracing;
use fanout_fabric::Fabric;

/// Logs a message and acknowledges it.
struct LogHandler {
    queue_channel: String,
}

#[async_trait]
impl ConsumerHandler for LogHandler {
    async fn consume(&self, message: Consumable) -> Result<bool, HandlerError> {
        info!(
            queue = %self.queue_channel,
            channel = message.channel.as_deref().unwrap_or("<legacy>"),
            payload = %message.msg,
            "Received message"
        );
        Ok(true)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;

    if config.tail.channels.is_empty() {
        warn!("No channels configured under tail.channels, nothing to consume");
        return Ok(());
    }

    let mut handlers = HandlerRegistry::new();
    for channel in &config.tail.channels {
        handlers.register(
            channel.clone(),
            Arc::new(LogHandler {
                queue_channel: channel.clone(),
            }),
        );
    }

    let fabric = Fabric::connect_aws(&config, handlers).await;
    let workers: Vec<_> = config
        .tail
        .channels
        .iter()
        .map(|channel| fabric.spawn_consumer(channel, config.tail.max_messages))
        .collect();

    info!(channels = ?config.tail.channels, "fanout-tail started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown_all(workers).await;

    Ok(())
}
