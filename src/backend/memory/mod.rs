//! In-memory notification + queue backend.
//!
//! Behaves like SNS/SQS closely enough to exercise reconciliation and the
//! consume cycle without a network:
//! - topic delivery only reaches queues whose policy grants the topic
//! - received messages stay invisible until the lease expires on a manual clock
//! - `create_queue` is idempotent for equal attributes, `AlreadyExists` otherwise
//! - receive rejects batch sizes outside 1..=10
//!
//! Receives never block; the long-poll wait is recorded but not honored.
//! Every call is counted per operation and failures can be queued per
//! operation for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    BackendError, BackendResult, NotificationService, QueueService, ReceiveRequest,
    ReceivedMessage, Subscription, POLICY_ATTRIBUTE, QUEUE_ARN_ATTRIBUTE, QUEUE_PROTOCOL,
};
use crate::config::AccountScope;
use crate::policy::{build_statement, PolicyDocument};

/// Largest batch a single receive may request.
const MAX_RECEIVE_BATCH: i32 = 10;

/// Operation names used for call counting and failure injection.
pub mod ops {
    pub const DESCRIBE_TOPIC: &str = "describe_topic";
    pub const CREATE_TOPIC: &str = "create_topic";
    pub const LIST_SUBSCRIPTIONS: &str = "list_subscriptions";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const PUBLISH: &str = "publish";
    pub const DESCRIBE_QUEUE: &str = "describe_queue";
    pub const CREATE_QUEUE: &str = "create_queue";
    pub const GET_QUEUE_ADDRESS: &str = "get_queue_address";
    pub const GET_ATTRIBUTES: &str = "get_attributes";
    pub const SET_ATTRIBUTES: &str = "set_attributes";
    pub const RECEIVE: &str = "receive";
    pub const DELETE: &str = "delete";
}

struct TopicState {
    subscriptions: Vec<(String, Subscription)>,
}

struct StoredMessage {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: u64,
}

struct QueueState {
    arn: String,
    attributes: HashMap<String, String>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, TopicState>,
    queues: HashMap<String, QueueState>,
    calls: HashMap<&'static str, usize>,
    receives: Vec<ReceiveRequest>,
    failures: HashMap<&'static str, VecDeque<BackendError>>,
    undelivered: usize,
}

impl State {
    fn record(&mut self, operation: &'static str) -> BackendResult<()> {
        *self.calls.entry(operation).or_default() += 1;
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn topic(&self, topic_arn: &str) -> BackendResult<&TopicState> {
        self.topics
            .get(topic_arn)
            .ok_or_else(|| BackendError::not_found(topic_arn))
    }

    fn queue(&self, queue_url: &str) -> BackendResult<&QueueState> {
        self.queues
            .get(queue_url)
            .ok_or_else(|| BackendError::not_found(queue_url))
    }

    fn queue_mut(&mut self, queue_url: &str) -> BackendResult<&mut QueueState> {
        self.queues
            .get_mut(queue_url)
            .ok_or_else(|| BackendError::not_found(queue_url))
    }
}

/// In-memory backend implementing both service traits.
pub struct InMemoryBackend {
    scope: AccountScope,
    state: RwLock<State>,
    clock_secs: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(scope: AccountScope) -> Self {
        Self {
            scope,
            state: RwLock::new(State::default()),
            clock_secs: AtomicU64::new(0),
        }
    }

    pub fn scope(&self) -> &AccountScope {
        &self.scope
    }

    /// Move the lease clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock_secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    fn now(&self) -> u64 {
        self.clock_secs.load(Ordering::SeqCst)
    }

    /// Number of calls made to `operation` (see [`ops`]).
    pub async fn call_count(&self, operation: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Total create calls across topics, queues, subscriptions and policies.
    pub async fn create_calls(&self) -> usize {
        self.call_count(ops::CREATE_TOPIC).await
            + self.call_count(ops::CREATE_QUEUE).await
            + self.call_count(ops::SUBSCRIBE).await
            + self.call_count(ops::SET_ATTRIBUTES).await
    }

    /// Every receive request seen so far.
    pub async fn receive_requests(&self) -> Vec<ReceiveRequest> {
        self.state.read().await.receives.clone()
    }

    /// Fail the next call to `operation` with `error`. Queued errors are
    /// consumed in order.
    pub async fn fail_next(&self, operation: &'static str, error: BackendError) {
        self.state
            .write()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Messages stored in a queue, visible or not.
    pub async fn queue_depth(&self, queue_url: &str) -> usize {
        self.state
            .read()
            .await
            .queues
            .get(queue_url)
            .map_or(0, |q| q.messages.len())
    }

    /// Publishes dropped because no subscriber queue policy granted the topic.
    pub async fn undelivered(&self) -> usize {
        self.state.read().await.undelivered
    }

    /// Put a body straight into a queue, bypassing topics.
    pub async fn send_raw(&self, queue_url: &str, body: impl Into<String>) -> BackendResult<String> {
        let now = self.now();
        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_url)?;
        let message_id = uuid::Uuid::new_v4().to_string();
        queue.messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            receipt_handle: None,
            visible_at: now,
        });
        Ok(message_id)
    }
}

#[async_trait]
impl NotificationService for InMemoryBackend {
    async fn describe_topic(&self, topic_arn: &str) -> BackendResult<HashMap<String, String>> {
        let mut state = self.state.write().await;
        state.record(ops::DESCRIBE_TOPIC)?;
        let topic = state.topic(topic_arn)?;
        Ok(HashMap::from([
            ("TopicArn".to_string(), topic_arn.to_string()),
            (
                "SubscriptionsConfirmed".to_string(),
                topic.subscriptions.len().to_string(),
            ),
        ]))
    }

    async fn create_topic(&self, name: &str) -> BackendResult<String> {
        let mut state = self.state.write().await;
        state.record(ops::CREATE_TOPIC)?;
        let arn = self.scope.topic_arn(name);
        state.topics.entry(arn.clone()).or_insert_with(|| TopicState {
            subscriptions: Vec::new(),
        });
        Ok(arn)
    }

    async fn list_subscriptions(&self, topic_arn: &str) -> BackendResult<Vec<Subscription>> {
        let mut state = self.state.write().await;
        state.record(ops::LIST_SUBSCRIPTIONS)?;
        Ok(state
            .topic(topic_arn)?
            .subscriptions
            .iter()
            .map(|(_, sub)| sub.clone())
            .collect())
    }

    async fn subscribe(
        &self,
        endpoint: &str,
        protocol: &str,
        topic_arn: &str,
    ) -> BackendResult<String> {
        let mut state = self.state.write().await;
        state.record(ops::SUBSCRIBE)?;
        let topic = state
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| BackendError::not_found(topic_arn))?;

        if let Some((arn, _)) = topic
            .subscriptions
            .iter()
            .find(|(_, sub)| sub.protocol == protocol && sub.endpoint == endpoint)
        {
            return Ok(arn.clone());
        }

        let arn = format!("{}:{}", topic_arn, uuid::Uuid::new_v4());
        topic.subscriptions.push((
            arn.clone(),
            Subscription {
                protocol: protocol.to_string(),
                endpoint: endpoint.to_string(),
            },
        ));
        Ok(arn)
    }

    async fn publish(&self, topic_arn: &str, body: &str) -> BackendResult<String> {
        let now = self.now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.record(ops::PUBLISH)?;

        let endpoints: Vec<String> = state
            .topic(topic_arn)?
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.protocol == QUEUE_PROTOCOL)
            .map(|(_, sub)| sub.endpoint.clone())
            .collect();

        let message_id = uuid::Uuid::new_v4().to_string();
        let notification = json!({
            "Type": "Notification",
            "MessageId": message_id,
            "TopicArn": topic_arn,
            "Message": body,
        })
        .to_string();

        for endpoint in endpoints {
            let queue = state.queues.values_mut().find(|q| q.arn == endpoint);
            let Some(queue) = queue else {
                state.undelivered += 1;
                continue;
            };

            let permitted = queue
                .attributes
                .get(POLICY_ATTRIBUTE)
                .and_then(|p| PolicyDocument::parse(p).ok())
                .is_some_and(|p| p.contains_statement(&build_statement(&queue.arn, topic_arn)));

            if permitted {
                queue.messages.push(StoredMessage {
                    message_id: message_id.clone(),
                    body: notification.clone(),
                    receipt_handle: None,
                    visible_at: now,
                });
            } else {
                debug!(queue = %endpoint, topic = %topic_arn, "Delivery denied by queue policy");
                state.undelivered += 1;
            }
        }

        Ok(message_id)
    }
}

#[async_trait]
impl QueueService for InMemoryBackend {
    async fn describe_queue(&self, queue_url: &str) -> BackendResult<HashMap<String, String>> {
        let mut state = self.state.write().await;
        state.record(ops::DESCRIBE_QUEUE)?;
        let queue = state.queue(queue_url)?;
        let mut attributes = queue.attributes.clone();
        attributes.insert(QUEUE_ARN_ATTRIBUTE.to_string(), queue.arn.clone());
        Ok(attributes)
    }

    async fn create_queue(
        &self,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<String> {
        let mut state = self.state.write().await;
        state.record(ops::CREATE_QUEUE)?;
        let url = self.scope.queue_url(name);

        if let Some(existing) = state.queues.get(&url) {
            let same = attributes
                .iter()
                .all(|(k, v)| existing.attributes.get(k) == Some(v));
            return if same {
                Ok(url)
            } else {
                Err(BackendError::already_exists(url))
            };
        }

        state.queues.insert(
            url.clone(),
            QueueState {
                arn: self.scope.queue_arn(name),
                attributes,
                messages: Vec::new(),
            },
        );
        Ok(url)
    }

    async fn get_queue_address(&self, queue_url: &str) -> BackendResult<String> {
        let mut state = self.state.write().await;
        state.record(ops::GET_QUEUE_ADDRESS)?;
        Ok(state.queue(queue_url)?.arn.clone())
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> BackendResult<HashMap<String, String>> {
        let mut state = self.state.write().await;
        state.record(ops::GET_ATTRIBUTES)?;
        let queue = state.queue(queue_url)?;

        let mut all = queue.attributes.clone();
        all.insert(QUEUE_ARN_ATTRIBUTE.to_string(), queue.arn.clone());

        if names.contains(&"All") {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|(k, _)| names.contains(&k.as_str()))
            .collect())
    }

    async fn set_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<()> {
        let mut state = self.state.write().await;
        state.record(ops::SET_ATTRIBUTES)?;
        state.queue_mut(queue_url)?.attributes.extend(attributes);
        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> BackendResult<Vec<ReceivedMessage>> {
        let now = self.now();
        let mut state = self.state.write().await;
        state.record(ops::RECEIVE)?;
        state.receives.push(request);

        if !(1..=MAX_RECEIVE_BATCH).contains(&request.max_messages) {
            return Err(BackendError::service(
                "receive",
                format!(
                    "InvalidParameterValue: MaxNumberOfMessages {} outside 1..={}",
                    request.max_messages, MAX_RECEIVE_BATCH
                ),
            ));
        }

        let lease = u64::try_from(request.visibility_timeout_secs).unwrap_or(0);
        let queue = state.queue_mut(queue_url)?;
        let batch = queue
            .messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(request.max_messages as usize)
            .map(|m| {
                let receipt = uuid::Uuid::new_v4().to_string();
                m.receipt_handle = Some(receipt.clone());
                m.visible_at = now + lease;
                ReceivedMessage {
                    message_id: m.message_id.clone(),
                    receipt_handle: receipt,
                    body: Some(m.body.clone()),
                }
            })
            .collect();

        Ok(batch)
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> BackendResult<()> {
        let mut state = self.state.write().await;
        state.record(ops::DELETE)?;
        let queue = state.queue_mut(queue_url)?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| {
                BackendError::service("delete", format!("ReceiptHandleIsInvalid: {}", receipt_handle))
            })?;
        queue.messages.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
