//! Channel publisher.
//!
//! Every publish reconciles the channel's topology first, so there is no
//! separate provisioning step: the first message on a new channel creates
//! the topic, the subscriber queues and their grants.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::backend::NotificationService;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::topology::{Subscriber, TopologyReconciler};

/// Publishes envelopes to channel topics.
pub struct Publisher {
    reconciler: Arc<TopologyReconciler>,
    notifications: Arc<dyn NotificationService>,
}

impl Publisher {
    pub fn new(
        reconciler: Arc<TopologyReconciler>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            reconciler,
            notifications,
        }
    }

    /// Publish `message` on `channel`, returning the backend message id.
    ///
    /// A reconcile failure aborts before anything is published.
    pub async fn publish(
        &self,
        message: Value,
        channel: &str,
        subscribers: &[Subscriber],
    ) -> Result<String> {
        self.reconciler.reconcile(channel, subscribers).await?;

        let topic_arn = self.reconciler.scope().topic_arn(channel);
        let body = Envelope::new(message, channel).encode()?;
        let message_id = self.notifications.publish(&topic_arn, &body).await?;

        debug!(
            channel = %channel,
            topic_arn = %topic_arn,
            message_id = %message_id,
            "Published message"
        );

        Ok(message_id)
    }
}
