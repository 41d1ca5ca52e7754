//! One-stop handle over reconcile, publish and consume.
//!
//! Built from a [`Config`] and a pair of backend handles. Producers call
//! [`Fabric::publish`]; consumers either drive [`Fabric::consume`] themselves
//! or hand a channel to [`Fabric::spawn_consumer`].

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::backend::{NotificationService, QueueService};
use crate::config::{AccountScope, Config};
use crate::consumer::{ConsumeLoop, ConsumerTaskHandle, HandlerRegistry};
use crate::error::Result;
use crate::publisher::Publisher;
use crate::topology::{Subscriber, TopologyReconciler, TopologyReport};

/// Reconciler, publisher and consume loop sharing one backend.
pub struct Fabric {
    reconciler: Arc<TopologyReconciler>,
    publisher: Publisher,
    consume_loop: Arc<ConsumeLoop>,
}

impl Fabric {
    pub fn new(
        config: &Config,
        notifications: Arc<dyn NotificationService>,
        queues: Arc<dyn QueueService>,
        handlers: HandlerRegistry,
    ) -> Self {
        let reconciler = Arc::new(
            TopologyReconciler::new(notifications.clone(), queues.clone(), config.scope.clone())
                .with_queue_wait_time(config.consume.queue_wait_time_secs),
        );
        let publisher = Publisher::new(reconciler.clone(), notifications);
        let consume_loop = Arc::new(
            ConsumeLoop::new(queues, config.scope.clone(), config.consume.clone())
                .with_handlers(handlers),
        );

        Self {
            reconciler,
            publisher,
            consume_loop,
        }
    }

    /// Fabric over AWS SNS/SQS using the default credential chain.
    #[cfg(feature = "sns-sqs")]
    pub async fn connect_aws(config: &Config, handlers: HandlerRegistry) -> Self {
        use crate::backend::sns_sqs::load_aws_config;
        use crate::backend::{SnsNotificationService, SqsQueueService};

        let sdk_config = load_aws_config(config).await;
        let notifications = Arc::new(SnsNotificationService::from_sdk_config(
            &sdk_config,
            config.error_codes.topic.clone(),
        ));
        let queues = Arc::new(SqsQueueService::from_sdk_config(
            &sdk_config,
            config.error_codes.queue.clone(),
        ));

        Self::new(config, notifications, queues, handlers)
    }

    pub fn scope(&self) -> &AccountScope {
        self.reconciler.scope()
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        self.consume_loop.handlers()
    }

    /// Provision `channel` and its subscribers without publishing.
    pub async fn setup(&self, channel: &str, subscribers: &[Subscriber]) -> Result<TopologyReport> {
        self.reconciler.reconcile(channel, subscribers).await
    }

    /// Publish `message` on `channel`, provisioning on the way.
    pub async fn publish(
        &self,
        message: Value,
        channel: &str,
        subscribers: &[Subscriber],
    ) -> Result<String> {
        self.publisher.publish(message, channel, subscribers).await
    }

    /// One consume cycle on `channel` with its registered handler.
    pub async fn consume(&self, channel: &str, max_messages: i32) -> Result<usize> {
        self.consume_loop.consume_once(channel, max_messages).await
    }

    /// Run consume cycles on `channel` in the background until stopped.
    pub fn spawn_consumer(&self, channel: &str, max_messages: i32) -> ConsumerTaskHandle {
        info!(channel = %channel, max_messages = max_messages, "Spawning consumer");
        crate::consumer::spawn_consumer(self.consume_loop.clone(), channel, max_messages)
    }
}
