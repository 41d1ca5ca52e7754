//! Topology reconciliation.
//!
//! Brings the backend to the state a channel needs before anything is
//! published to it:
//! ```text
//! topic(channel) ──subscription(sqs)──> queue(subscriber) ──policy──> topic may send
//! ```
//! Every step reads first and only creates on a recognized `NotFound` (or a
//! missing match), so a warm topology costs one read per resource and a
//! second run creates nothing. Creates tolerate `AlreadyExists` from a racing
//! reconciler on another node. Nothing is ever deleted.
//!
//! Policy merges are read-modify-write without a version check. Two producers
//! reconciling different topics onto one queue at the same moment can drop
//! each other's grant; the losing producer's next reconcile writes it back.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{
    BackendError, NotificationService, QueueService, POLICY_ATTRIBUTE, QUEUE_PROTOCOL,
    RECEIVE_WAIT_TIME_ATTRIBUTE,
};
use crate::config::{AccountScope, DEFAULT_WAIT_TIME_SECS};
use crate::error::{FabricError, Result};
use crate::policy::{build_policy, build_statement, PolicyDocument};

/// A consumer of a producer channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscriber {
    /// The consumer's own channel; names its queue.
    pub channel: String,
    /// Opaque handler identifier, resolved by the caller.
    pub consumer: String,
}

impl Subscriber {
    pub fn new(channel: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            consumer: consumer.into(),
        }
    }
}

/// Resources created by one reconcile call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologyReport {
    pub topic_created: bool,
    pub queues_created: usize,
    pub subscriptions_created: usize,
    pub policies_attached: usize,
}

impl TopologyReport {
    /// True when the backend already matched the desired topology.
    pub fn is_unchanged(&self) -> bool {
        *self == Self::default()
    }
}

/// Ensures topics, queues, subscriptions and queue policies exist.
pub struct TopologyReconciler {
    notifications: Arc<dyn NotificationService>,
    queues: Arc<dyn QueueService>,
    scope: AccountScope,
    queue_wait_time_secs: i32,
}

impl TopologyReconciler {
    pub fn new(
        notifications: Arc<dyn NotificationService>,
        queues: Arc<dyn QueueService>,
        scope: AccountScope,
    ) -> Self {
        Self {
            notifications,
            queues,
            scope,
            queue_wait_time_secs: DEFAULT_WAIT_TIME_SECS,
        }
    }

    /// Set `ReceiveMessageWaitTimeSeconds` for queues this reconciler creates.
    pub fn with_queue_wait_time(mut self, secs: i32) -> Self {
        self.queue_wait_time_secs = secs;
        self
    }

    pub fn scope(&self) -> &AccountScope {
        &self.scope
    }

    /// Ensure the topic for `channel` and the delivery path to every subscriber.
    ///
    /// Subscribers are processed in order; the first failure aborts the call.
    pub async fn reconcile(&self, channel: &str, subscribers: &[Subscriber]) -> Result<TopologyReport> {
        let mut report = TopologyReport {
            topic_created: self.ensure_topic(channel).await?,
            ..Default::default()
        };

        let topic_arn = self.scope.topic_arn(channel);
        for subscriber in subscribers {
            let queue_url = self.scope.queue_url(&subscriber.channel);

            if self.ensure_queue(&subscriber.channel, &queue_url).await? {
                report.queues_created += 1;
            }

            let queue_address = self.queues.get_queue_address(&queue_url).await?;

            if self.ensure_subscription(&queue_address, &topic_arn).await? {
                report.subscriptions_created += 1;
            }

            if self
                .ensure_policy(&queue_url, &queue_address, &topic_arn, &subscriber.channel)
                .await?
            {
                report.policies_attached += 1;
            }
        }

        if report.is_unchanged() {
            debug!(channel = %channel, subscribers = subscribers.len(), "Topology already in place");
        } else {
            info!(channel = %channel, report = ?report, "Reconciled topology");
        }

        Ok(report)
    }

    /// Returns true when the topic had to be created.
    async fn ensure_topic(&self, channel: &str) -> Result<bool> {
        let topic_arn = self.scope.topic_arn(channel);

        match self.notifications.describe_topic(&topic_arn).await {
            Ok(_) => return Ok(false),
            Err(BackendError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        self.notifications.create_topic(channel).await?;
        self.notifications.describe_topic(&topic_arn).await?;
        info!(channel = %channel, topic_arn = %topic_arn, "Created topic");
        Ok(true)
    }

    /// Returns true when this call created the queue.
    async fn ensure_queue(&self, name: &str, queue_url: &str) -> Result<bool> {
        match self.queues.describe_queue(queue_url).await {
            Ok(_) => return Ok(false),
            Err(BackendError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let attributes = HashMap::from([(
            RECEIVE_WAIT_TIME_ATTRIBUTE.to_string(),
            self.queue_wait_time_secs.to_string(),
        )]);

        let created = match self.queues.create_queue(name, attributes).await {
            Ok(_) => true,
            Err(BackendError::AlreadyExists { .. }) => {
                debug!(queue = %name, "Queue created concurrently by another reconciler");
                false
            }
            Err(e) => return Err(e.into()),
        };

        self.queues.describe_queue(queue_url).await?;
        if created {
            info!(queue = %name, queue_url = %queue_url, "Created queue");
        }
        Ok(created)
    }

    /// Returns true when a subscription had to be created.
    async fn ensure_subscription(&self, queue_address: &str, topic_arn: &str) -> Result<bool> {
        let subscribed = self
            .notifications
            .list_subscriptions(topic_arn)
            .await?
            .iter()
            .any(|s| s.protocol == QUEUE_PROTOCOL && s.endpoint == queue_address);

        if subscribed {
            return Ok(false);
        }

        self.notifications
            .subscribe(queue_address, QUEUE_PROTOCOL, topic_arn)
            .await?;
        info!(queue_address = %queue_address, topic_arn = %topic_arn, "Subscribed queue to topic");
        Ok(true)
    }

    /// Returns true when the grant had to be written.
    async fn ensure_policy(
        &self,
        queue_url: &str,
        queue_address: &str,
        topic_arn: &str,
        channel: &str,
    ) -> Result<bool> {
        let current = self
            .queues
            .get_attributes(queue_url, &[POLICY_ATTRIBUTE])
            .await?
            .remove(POLICY_ATTRIBUTE)
            .filter(|p| !p.trim().is_empty());

        let policy = match current {
            None => build_policy(queue_address, topic_arn, channel),
            Some(raw) => {
                let mut existing =
                    PolicyDocument::parse(&raw).map_err(|e| FabricError::Policy {
                        queue: queue_url.to_string(),
                        message: e.to_string(),
                    })?;

                let expected = build_statement(queue_address, topic_arn);
                if existing.contains_statement(&expected) {
                    return Ok(false);
                }
                existing.merge_statement(expected);
                existing
            }
        };

        let attributes = HashMap::from([(POLICY_ATTRIBUTE.to_string(), policy.to_json()?)]);
        self.queues.set_attributes(queue_url, attributes).await?;
        info!(queue_url = %queue_url, topic_arn = %topic_arn, "Attached send policy to queue");
        Ok(true)
    }
}
