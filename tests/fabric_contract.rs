//! Fabric behavior contract against the in-memory backend.
//!
//! Run with: cargo test --test fabric_contract

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fanout_fabric::backend::memory::ops;
use fanout_fabric::backend::{InMemoryBackend, QueueService};
use fanout_fabric::config::Config;
use fanout_fabric::consumer::{ConsumerHandler, HandlerError, HandlerRegistry};
use fanout_fabric::envelope::Consumable;
use fanout_fabric::policy::{build_statement, PolicyDocument};
use fanout_fabric::{Fabric, Subscriber};
use serde_json::json;

/// Handler recording every message and answering with a fixed verdict.
struct RecordingHandler {
    verdict: bool,
    seen: Mutex<Vec<Consumable>>,
}

impl RecordingHandler {
    fn new(verdict: bool) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Consumable> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsumerHandler for RecordingHandler {
    async fn consume(&self, message: Consumable) -> Result<bool, HandlerError> {
        self.seen.lock().unwrap().push(message);
        Ok(self.verdict)
    }
}

/// Accepts every message except the ones whose payload is `"reject"`.
struct SelectiveHandler;

#[async_trait]
impl ConsumerHandler for SelectiveHandler {
    async fn consume(&self, message: Consumable) -> Result<bool, HandlerError> {
        Ok(message.msg != json!("reject"))
    }
}

fn fabric_with(handler: Arc<dyn ConsumerHandler>) -> (Arc<InMemoryBackend>, Fabric) {
    let config = Config::for_test();
    let backend = Arc::new(InMemoryBackend::new(config.scope.clone()));
    let handlers = HandlerRegistry::new().with_handler("billing", handler);
    let fabric = Fabric::new(&config, backend.clone(), backend.clone(), handlers);
    (backend, fabric)
}

fn billing() -> [Subscriber; 1] {
    [Subscriber::new("billing", "billing_consumer")]
}

#[tokio::test]
async fn test_second_reconcile_creates_nothing() {
    let (backend, fabric) = fabric_with(RecordingHandler::new(true));
    let subscribers = [
        Subscriber::new("billing", "billing_consumer"),
        Subscriber::new("shipping", "shipping_consumer"),
    ];

    let first = fabric.setup("orders", &subscribers).await.unwrap();
    let creates = backend.create_calls().await;
    let second = fabric.setup("orders", &subscribers).await.unwrap();

    assert!(first.topic_created);
    assert_eq!(first.queues_created, 2);
    assert!(second.is_unchanged());
    assert_eq!(backend.create_calls().await, creates);
}

#[tokio::test]
async fn test_round_trip() {
    let handler = RecordingHandler::new(true);
    let (backend, fabric) = fabric_with(handler.clone());

    fabric.publish(json!("hello"), "orders", &billing()).await.unwrap();
    let consumed = fabric.consume("billing", 10).await.unwrap();

    assert_eq!(consumed, 1);
    assert_eq!(
        handler.seen(),
        vec![Consumable {
            msg: json!("hello"),
            channel: Some("orders".to_string()),
        }]
    );
    assert_eq!(backend.call_count(ops::DELETE).await, 1);
}

#[tokio::test]
async fn test_fan_out_reaches_every_subscriber() {
    let config = Config::for_test();
    let backend = Arc::new(InMemoryBackend::new(config.scope.clone()));
    let billing = RecordingHandler::new(true);
    let shipping = RecordingHandler::new(true);
    let handlers = HandlerRegistry::new()
        .with_handler("billing", billing.clone())
        .with_handler("shipping", shipping.clone());
    let fabric = Fabric::new(&config, backend.clone(), backend.clone(), handlers);
    let subscribers = [
        Subscriber::new("billing", "billing_consumer"),
        Subscriber::new("shipping", "shipping_consumer"),
    ];

    fabric.publish(json!({"id": 1}), "orders", &subscribers).await.unwrap();
    fabric.consume("billing", 10).await.unwrap();
    fabric.consume("shipping", 10).await.unwrap();

    assert_eq!(billing.seen().len(), 1);
    assert_eq!(shipping.seen().len(), 1);
    assert_eq!(backend.undelivered().await, 0);
}

#[tokio::test]
async fn test_legacy_payload_decodes_without_channel() {
    let handler = RecordingHandler::new(true);
    let (backend, fabric) = fabric_with(handler.clone());
    fabric.setup("orders", &billing()).await.unwrap();

    let legacy = json!({"Type": "Notification", "Message": "\"hello\""}).to_string();
    backend
        .send_raw(&fabric.scope().queue_url("billing"), legacy)
        .await
        .unwrap();
    fabric.consume("billing", 10).await.unwrap();

    assert_eq!(
        handler.seen(),
        vec![Consumable {
            msg: json!("hello"),
            channel: None,
        }]
    );
}

#[tokio::test]
async fn test_rejected_message_redelivered_after_lease() {
    let handler = RecordingHandler::new(false);
    let (backend, fabric) = fabric_with(handler.clone());
    fabric.publish(json!("retry-me"), "orders", &billing()).await.unwrap();

    assert_eq!(fabric.consume("billing", 10).await.unwrap(), 1);
    assert_eq!(backend.call_count(ops::DELETE).await, 0);

    backend.advance(Duration::from_secs(599));
    assert_eq!(fabric.consume("billing", 10).await.unwrap(), 0);

    backend.advance(Duration::from_secs(1));
    assert_eq!(fabric.consume("billing", 10).await.unwrap(), 1);
    assert_eq!(handler.seen().len(), 2);
}

#[tokio::test]
async fn test_batch_size_clamped() {
    let (backend, fabric) = fabric_with(RecordingHandler::new(true));
    fabric.setup("orders", &billing()).await.unwrap();

    fabric.consume("billing", -1).await.unwrap();
    fabric.consume("billing", 50).await.unwrap();

    let sizes: Vec<i32> = backend
        .receive_requests()
        .await
        .iter()
        .map(|r| r.max_messages)
        .collect();
    assert_eq!(sizes, vec![10, 10]);
}

#[tokio::test]
async fn test_scalar_action_policy_is_recognized() {
    let (backend, fabric) = fabric_with(RecordingHandler::new(true));
    let scope = fabric.scope().clone();
    let queue_url = scope.queue_url("billing");
    let queue_arn = scope.queue_arn("billing");
    let topic_arn = scope.topic_arn("orders");

    backend.create_queue("billing", Default::default()).await.unwrap();
    let scalar_policy = json!({
        "Version": "2012-10-17",
        "Id": "sns.billing.queue",
        "Statement": [{
            "Sid": "Legacy",
            "Effect": "Allow",
            "Principal": "*",
            "Action": "SQS:SendMessage",
            "Resource": queue_arn,
            "Condition": {"ArnEquals": {"aws:SourceArn": topic_arn}}
        }]
    });
    backend
        .set_attributes(
            &queue_url,
            [("Policy".to_string(), scalar_policy.to_string())].into(),
        )
        .await
        .unwrap();
    let sets_before = backend.call_count(ops::SET_ATTRIBUTES).await;

    let report = fabric.setup("orders", &billing()).await.unwrap();

    assert_eq!(report.policies_attached, 0);
    assert_eq!(backend.call_count(ops::SET_ATTRIBUTES).await, sets_before);
    let stored = backend.get_attributes(&queue_url, &["Policy"]).await.unwrap();
    let policy = PolicyDocument::parse(&stored["Policy"]).unwrap();
    assert!(policy.contains_statement(&build_statement(&queue_arn, &topic_arn)));
}

#[tokio::test]
async fn test_consumed_counts_rejections() {
    let (backend, fabric) = fabric_with(Arc::new(SelectiveHandler));
    for payload in ["a", "reject", "b"] {
        fabric.publish(json!(payload), "orders", &billing()).await.unwrap();
    }

    let consumed = fabric.consume("billing", 10).await.unwrap();

    assert_eq!(consumed, 3);
    assert_eq!(backend.call_count(ops::DELETE).await, 2);
}

#[tokio::test]
async fn test_second_producer_keeps_first_grant() {
    let handler = RecordingHandler::new(true);
    let (_, fabric) = fabric_with(handler.clone());

    fabric.publish(json!(1), "orders", &billing()).await.unwrap();
    fabric.publish(json!(2), "refunds", &billing()).await.unwrap();
    fabric.publish(json!(3), "orders", &billing()).await.unwrap();
    fabric.consume("billing", 10).await.unwrap();

    let channels: Vec<_> = handler
        .seen()
        .into_iter()
        .map(|c| c.channel.unwrap_or_default())
        .collect();
    assert_eq!(channels, vec!["orders", "refunds", "orders"]);
}
