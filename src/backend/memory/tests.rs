use super::*;
use crate::policy::build_policy;

fn backend() -> InMemoryBackend {
    InMemoryBackend::new(AccountScope::new("123456789012", "us-east-1"))
}

fn request(max_messages: i32) -> ReceiveRequest {
    ReceiveRequest {
        max_messages,
        wait_time_secs: 20,
        visibility_timeout_secs: 600,
    }
}

/// Topic `orders` delivering into queue `billing`, policy attached.
async fn wired(backend: &InMemoryBackend) -> (String, String) {
    let topic = backend.create_topic("orders").await.unwrap();
    let queue = backend.create_queue("billing", HashMap::new()).await.unwrap();
    let queue_arn = backend.get_queue_address(&queue).await.unwrap();
    backend.subscribe(&queue_arn, QUEUE_PROTOCOL, &topic).await.unwrap();
    let policy = build_policy(&queue_arn, &topic, "billing").to_json().unwrap();
    backend
        .set_attributes(&queue, HashMap::from([(POLICY_ATTRIBUTE.to_string(), policy)]))
        .await
        .unwrap();
    (topic, queue)
}

#[tokio::test]
async fn test_describe_missing_resources_is_not_found() {
    let backend = backend();
    let scope = backend.scope().clone();

    let topic_err = backend.describe_topic(&scope.topic_arn("nope")).await.unwrap_err();
    let queue_err = backend.describe_queue(&scope.queue_url("nope")).await.unwrap_err();

    assert!(topic_err.is_not_found());
    assert!(queue_err.is_not_found());
}

#[tokio::test]
async fn test_create_topic_is_idempotent() {
    let backend = backend();
    let first = backend.create_topic("orders").await.unwrap();
    let second = backend.create_topic("orders").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, "arn:aws:sns:us-east-1:123456789012:orders");
}

#[tokio::test]
async fn test_create_queue_conflicting_attributes() {
    let backend = backend();
    backend.create_queue("billing", HashMap::new()).await.unwrap();

    let again = backend.create_queue("billing", HashMap::new()).await;
    let conflicting = backend
        .create_queue(
            "billing",
            HashMap::from([("VisibilityTimeout".to_string(), "5".to_string())]),
        )
        .await;

    assert!(again.is_ok());
    assert!(conflicting.unwrap_err().is_already_exists());
}

#[tokio::test]
async fn test_subscribe_is_idempotent() {
    let backend = backend();
    let topic = backend.create_topic("orders").await.unwrap();

    let a = backend.subscribe("arn:q", QUEUE_PROTOCOL, &topic).await.unwrap();
    let b = backend.subscribe("arn:q", QUEUE_PROTOCOL, &topic).await.unwrap();

    assert_eq!(a, b);
    assert_eq!(backend.list_subscriptions(&topic).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_publish_requires_policy_grant() {
    let backend = backend();
    let topic = backend.create_topic("orders").await.unwrap();
    let queue = backend.create_queue("billing", HashMap::new()).await.unwrap();
    let queue_arn = backend.get_queue_address(&queue).await.unwrap();
    backend.subscribe(&queue_arn, QUEUE_PROTOCOL, &topic).await.unwrap();

    backend.publish(&topic, "body").await.unwrap();

    assert_eq!(backend.queue_depth(&queue).await, 0);
    assert_eq!(backend.undelivered().await, 1);
}

#[tokio::test]
async fn test_publish_wraps_in_notification() {
    let backend = backend();
    let (topic, queue) = wired(&backend).await;

    let message_id = backend.publish(&topic, "body").await.unwrap();
    let received = backend.receive(&queue, request(10)).await.unwrap();

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id, message_id);
    let body: serde_json::Value =
        serde_json::from_str(received[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body["Message"], "body");
    assert_eq!(body["TopicArn"], topic.as_str());
}

#[tokio::test]
async fn test_lease_hides_until_expiry() {
    let backend = backend();
    let (topic, queue) = wired(&backend).await;
    backend.publish(&topic, "body").await.unwrap();

    assert_eq!(backend.receive(&queue, request(10)).await.unwrap().len(), 1);
    assert!(backend.receive(&queue, request(10)).await.unwrap().is_empty());

    backend.advance(Duration::from_secs(599));
    assert!(backend.receive(&queue, request(10)).await.unwrap().is_empty());

    backend.advance(Duration::from_secs(1));
    assert_eq!(backend.receive(&queue, request(10)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_uses_latest_receipt() {
    let backend = backend();
    let (topic, queue) = wired(&backend).await;
    backend.publish(&topic, "body").await.unwrap();

    let first = backend.receive(&queue, request(1)).await.unwrap().remove(0);
    backend.advance(Duration::from_secs(600));
    let second = backend.receive(&queue, request(1)).await.unwrap().remove(0);

    assert!(backend.delete(&queue, &first.receipt_handle).await.is_err());
    backend.delete(&queue, &second.receipt_handle).await.unwrap();
    assert_eq!(backend.queue_depth(&queue).await, 0);
}

#[tokio::test]
async fn test_receive_rejects_out_of_range_batch() {
    let backend = backend();
    let (_, queue) = wired(&backend).await;

    assert!(backend.receive(&queue, request(0)).await.is_err());
    assert!(backend.receive(&queue, request(11)).await.is_err());
    assert!(backend.receive(&queue, request(10)).await.is_ok());
}

#[tokio::test]
async fn test_fail_next_is_consumed_once() {
    let backend = backend();
    backend
        .fail_next(ops::CREATE_TOPIC, BackendError::service("create_topic", "throttled"))
        .await;

    assert!(backend.create_topic("orders").await.is_err());
    assert!(backend.create_topic("orders").await.is_ok());
    assert_eq!(backend.call_count(ops::CREATE_TOPIC).await, 2);
}

#[tokio::test]
async fn test_get_attributes_filters_names() {
    let backend = backend();
    let (_, queue) = wired(&backend).await;

    let only_policy = backend.get_attributes(&queue, &[POLICY_ATTRIBUTE]).await.unwrap();
    let all = backend.get_attributes(&queue, &["All"]).await.unwrap();

    assert_eq!(only_policy.len(), 1);
    assert!(all.contains_key(QUEUE_ARN_ATTRIBUTE));
}
