//! Queue consumption.
//!
//! One consume cycle is one long-poll receive followed by strictly
//! sequential processing of the batch:
//! ```text
//! received ──handler true──> deleted
//!    └─────handler false / error──> invisible until lease expiry ──> received again
//! ```
//! Acknowledgment is an explicit delete after the handler succeeded for that
//! particular message. Everything else is redelivered by the backend once
//! the visibility lease runs out.

mod registry;
mod worker;

pub use registry::HandlerRegistry;
pub use worker::{shutdown_all, spawn_consumer, ConsumerTaskHandle};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::backend::{QueueService, ReceiveRequest, ReceivedMessage};
use crate::config::{AccountScope, ConsumeConfig, DecodeFailurePolicy};
use crate::envelope::{decode_body, Consumable};
use crate::error::{FabricError, Result};

/// Hard per-call ceiling of the queue service.
pub const MAX_RECEIVE_BATCH: i32 = 10;

/// Batch size actually requested for a caller's `max_messages`.
///
/// `-1` (and any other non-positive value) means "as many as allowed".
pub fn clamp_batch_size(max_messages: i32) -> i32 {
    if (1..MAX_RECEIVE_BATCH).contains(&max_messages) {
        max_messages
    } else {
        MAX_RECEIVE_BATCH
    }
}

/// Failure reported by a handler instead of a verdict.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Business logic invoked once per received message.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// `Ok(true)` acknowledges the message. `Ok(false)` and `Err` leave it
    /// for redelivery.
    async fn consume(&self, message: Consumable) -> std::result::Result<bool, HandlerError>;
}

enum Outcome {
    Acknowledged,
    Rejected,
    Failed,
    Undecodable,
}

/// Runs consume cycles for subscriber channels.
pub struct ConsumeLoop {
    queues: Arc<dyn QueueService>,
    scope: AccountScope,
    config: ConsumeConfig,
    handlers: HandlerRegistry,
}

impl ConsumeLoop {
    pub fn new(queues: Arc<dyn QueueService>, scope: AccountScope, config: ConsumeConfig) -> Self {
        Self {
            queues,
            scope,
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// One cycle on `channel` using its registered handler.
    ///
    /// Returns how many messages were pulled, whatever the handler said.
    pub async fn consume_once(&self, channel: &str, max_messages: i32) -> Result<usize> {
        let handler = self
            .handlers
            .get(channel)
            .ok_or_else(|| FabricError::HandlerNotRegistered(channel.to_string()))?;
        self.consume_with(channel, handler.as_ref(), max_messages)
            .await
    }

    /// One cycle on `channel` with an explicit handler.
    ///
    /// Receive and delete failures abort the remaining batch. Handler errors
    /// and undecodable bodies only affect their own message.
    pub async fn consume_with(
        &self,
        channel: &str,
        handler: &dyn ConsumerHandler,
        max_messages: i32,
    ) -> Result<usize> {
        let queue_url = self.scope.queue_url(channel);
        let request = ReceiveRequest {
            max_messages: clamp_batch_size(max_messages),
            wait_time_secs: self.config.wait_time_secs,
            visibility_timeout_secs: self.config.visibility_timeout_secs,
        };

        let messages = self.queues.receive(&queue_url, request).await?;

        let mut consumed = 0;
        let mut acknowledged = 0;
        for message in &messages {
            consumed += 1;
            if let Outcome::Acknowledged = self.process(&queue_url, handler, message).await? {
                acknowledged += 1;
            }
        }

        if consumed == 0 {
            debug!(channel = %channel, "Poll window elapsed with no messages");
        } else {
            info!(
                channel = %channel,
                consumed = consumed,
                acknowledged = acknowledged,
                "Consume cycle finished"
            );
        }

        Ok(consumed)
    }

    async fn process(
        &self,
        queue_url: &str,
        handler: &dyn ConsumerHandler,
        message: &ReceivedMessage,
    ) -> Result<Outcome> {
        let consumable = match decode_body(message.body.as_deref()) {
            Ok(consumable) => consumable,
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    queue_url = %queue_url,
                    error = %e,
                    "Failed to decode message"
                );
                if self.config.decode_failures == DecodeFailurePolicy::Discard {
                    self.queues
                        .delete(queue_url, &message.receipt_handle)
                        .await?;
                    warn!(message_id = %message.message_id, "Discarded undecodable message");
                }
                return Ok(Outcome::Undecodable);
            }
        };

        match handler.consume(consumable).await {
            Ok(true) => {
                self.queues
                    .delete(queue_url, &message.receipt_handle)
                    .await?;
                Ok(Outcome::Acknowledged)
            }
            Ok(false) => {
                debug!(
                    message_id = %message.message_id,
                    "Handler declined message, will be redelivered after visibility timeout"
                );
                Ok(Outcome::Rejected)
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "Handler failed, will be redelivered after visibility timeout"
                );
                Ok(Outcome::Failed)
            }
        }
    }
}
