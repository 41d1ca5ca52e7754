//! Backend capability interfaces.
//!
//! This module contains:
//! - `NotificationService` trait: topic side (SNS-shaped)
//! - `QueueService` trait: queue side (SQS-shaped)
//! - `BackendError`: tagged result every backend call returns
//! - Implementations: AWS SNS/SQS, in-memory

use std::collections::HashMap;

use async_trait::async_trait;

pub mod memory;
#[cfg(feature = "sns-sqs")]
pub mod sns_sqs;

pub use memory::InMemoryBackend;
#[cfg(feature = "sns-sqs")]
pub use sns_sqs::{SnsNotificationService, SqsQueueService};

/// Subscription protocol for topic -> queue delivery.
pub const QUEUE_PROTOCOL: &str = "sqs";

/// Queue attribute holding the access policy document.
pub const POLICY_ATTRIBUTE: &str = "Policy";

/// Queue attribute holding the queue ARN.
pub const QUEUE_ARN_ATTRIBUTE: &str = "QueueArn";

/// Queue attribute for the default long-poll wait.
pub const RECEIVE_WAIT_TIME_ATTRIBUTE: &str = "ReceiveMessageWaitTimeSeconds";

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Tagged outcome of a failed backend call.
///
/// Only `NotFound` drives the create fallback in the reconciler and only
/// `AlreadyExists` is tolerated on create. Everything else is fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        BackendError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        BackendError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        BackendError::Service {
            operation,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::AlreadyExists { .. })
    }
}

/// A topic -> endpoint link as reported by the notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub protocol: String,
    pub endpoint: String,
}

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: i32,
    pub wait_time_secs: i32,
    pub visibility_timeout_secs: i32,
}

/// A message leased from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle for deleting this particular receipt.
    pub receipt_handle: String,
    pub body: Option<String>,
}

/// Topic-side operations.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Topic attributes; `NotFound` when the topic does not exist.
    async fn describe_topic(&self, topic_arn: &str) -> BackendResult<HashMap<String, String>>;

    /// Create a topic by name, returning its ARN.
    async fn create_topic(&self, name: &str) -> BackendResult<String>;

    /// Every subscription currently attached to a topic.
    async fn list_subscriptions(&self, topic_arn: &str) -> BackendResult<Vec<Subscription>>;

    /// Link an endpoint to a topic, returning the subscription ARN.
    async fn subscribe(&self, endpoint: &str, protocol: &str, topic_arn: &str)
        -> BackendResult<String>;

    /// Publish a message body, returning the backend message id.
    async fn publish(&self, topic_arn: &str, body: &str) -> BackendResult<String>;
}

/// Queue-side operations.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Queue attributes; `NotFound` when the queue does not exist.
    async fn describe_queue(&self, queue_url: &str) -> BackendResult<HashMap<String, String>>;

    /// Create a queue by name, returning its URL.
    async fn create_queue(
        &self,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<String>;

    /// Backend-assigned address (ARN) used as subscription endpoint and policy resource.
    async fn get_queue_address(&self, queue_url: &str) -> BackendResult<String>;

    /// Selected attributes. Absent attributes are missing from the map.
    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> BackendResult<HashMap<String, String>>;

    async fn set_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<()>;

    /// One (long-poll) receive call.
    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> BackendResult<Vec<ReceivedMessage>>;

    /// Acknowledge a receipt.
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> BackendResult<()>;
}
