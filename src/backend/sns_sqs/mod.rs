//! AWS SNS/SQS implementation of the backend capability traits.
//!
//! Thin adapters over `aws-sdk-sns` and `aws-sdk-sqs`. Every SDK failure is
//! classified through the configured [`ErrorCodeMapping`] so callers only
//! ever see `NotFound`, `AlreadyExists` or `Service`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns::config::http::HttpResponse;
use aws_sdk_sns::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client as SqsClient;
use tracing::{debug, info};

use super::{
    BackendError, BackendResult, NotificationService, QueueService, ReceiveRequest,
    ReceivedMessage, Subscription, QUEUE_ARN_ATTRIBUTE,
};
use crate::config::{Config, ErrorCodeMapping, ErrorKind};

/// Load shared AWS configuration for the fabric's region and endpoint.
pub async fn load_aws_config(config: &Config) -> aws_config::SdkConfig {
    let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest());

    if !config.scope.region.is_empty() {
        aws_config_builder =
            aws_config_builder.region(aws_config::Region::new(config.scope.region.clone()));
    }

    if let Some(ref endpoint) = config.endpoint_url {
        aws_config_builder = aws_config_builder.endpoint_url(endpoint);
    }

    let aws_config = aws_config_builder.load().await;

    info!(
        region = %config.scope.region,
        endpoint = ?config.endpoint_url,
        "Connected to AWS SNS/SQS"
    );

    aws_config
}

/// Map an SDK failure onto the tagged backend error.
fn classify<E>(
    err: SdkError<E, HttpResponse>,
    operation: &'static str,
    resource: &str,
    mapping: &ErrorCodeMapping,
) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.as_service_error().and_then(|e| e.code());

    match mapping.classify(status, code) {
        ErrorKind::NotFound => BackendError::not_found(resource),
        ErrorKind::AlreadyExists => BackendError::already_exists(resource),
        ErrorKind::Other => {
            BackendError::service(operation, DisplayErrorContext(&err).to_string())
        }
    }
}

fn missing(operation: &'static str, field: &str) -> BackendError {
    BackendError::service(operation, format!("response carried no {}", field))
}

/// SNS-backed notification service.
#[derive(Clone)]
pub struct SnsNotificationService {
    client: SnsClient,
    errors: ErrorCodeMapping,
}

impl SnsNotificationService {
    pub fn new(client: SnsClient, errors: ErrorCodeMapping) -> Self {
        Self { client, errors }
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, errors: ErrorCodeMapping) -> Self {
        Self::new(SnsClient::new(sdk_config), errors)
    }
}

#[async_trait]
impl NotificationService for SnsNotificationService {
    async fn describe_topic(&self, topic_arn: &str) -> BackendResult<HashMap<String, String>> {
        let output = self
            .client
            .get_topic_attributes()
            .topic_arn(topic_arn)
            .send()
            .await
            .map_err(|e| classify(e, "GetTopicAttributes", topic_arn, &self.errors))?;

        Ok(output.attributes().cloned().unwrap_or_default())
    }

    async fn create_topic(&self, name: &str) -> BackendResult<String> {
        let output = self
            .client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(|e| classify(e, "CreateTopic", name, &self.errors))?;

        let arn = output
            .topic_arn()
            .ok_or_else(|| missing("CreateTopic", "TopicArn"))?
            .to_string();

        info!(topic = %name, arn = %arn, "Created SNS topic");
        Ok(arn)
    }

    async fn list_subscriptions(&self, topic_arn: &str) -> BackendResult<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_subscriptions_by_topic()
                .topic_arn(topic_arn)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(e, "ListSubscriptionsByTopic", topic_arn, &self.errors))?;

            subscriptions.extend(output.subscriptions().iter().map(|s| Subscription {
                protocol: s.protocol().unwrap_or_default().to_string(),
                endpoint: s.endpoint().unwrap_or_default().to_string(),
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(subscriptions)
    }

    async fn subscribe(
        &self,
        endpoint: &str,
        protocol: &str,
        topic_arn: &str,
    ) -> BackendResult<String> {
        let output = self
            .client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint)
            .send()
            .await
            .map_err(|e| classify(e, "Subscribe", topic_arn, &self.errors))?;

        debug!(endpoint = %endpoint, topic_arn = %topic_arn, "Subscribed endpoint to topic");
        Ok(output.subscription_arn().unwrap_or_default().to_string())
    }

    async fn publish(&self, topic_arn: &str, body: &str) -> BackendResult<String> {
        let output = self
            .client
            .publish()
            .topic_arn(topic_arn)
            .message(body)
            .send()
            .await
            .map_err(|e| classify(e, "Publish", topic_arn, &self.errors))?;

        Ok(output
            .message_id()
            .ok_or_else(|| missing("Publish", "MessageId"))?
            .to_string())
    }
}

/// SQS-backed queue service.
#[derive(Clone)]
pub struct SqsQueueService {
    client: SqsClient,
    errors: ErrorCodeMapping,
}

impl SqsQueueService {
    pub fn new(client: SqsClient, errors: ErrorCodeMapping) -> Self {
        Self { client, errors }
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, errors: ErrorCodeMapping) -> Self {
        Self::new(SqsClient::new(sdk_config), errors)
    }

    async fn attributes(
        &self,
        operation: &'static str,
        queue_url: &str,
        names: Vec<QueueAttributeName>,
    ) -> BackendResult<HashMap<String, String>> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .set_attribute_names(Some(names))
            .send()
            .await
            .map_err(|e| classify(e, operation, queue_url, &self.errors))?;

        Ok(output
            .attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn to_sdk_attributes(attributes: HashMap<String, String>) -> HashMap<QueueAttributeName, String> {
    attributes
        .into_iter()
        .map(|(k, v)| (QueueAttributeName::from(k.as_str()), v))
        .collect()
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn describe_queue(&self, queue_url: &str) -> BackendResult<HashMap<String, String>> {
        self.attributes("GetQueueAttributes", queue_url, vec![QueueAttributeName::All])
            .await
    }

    async fn create_queue(
        &self,
        name: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<String> {
        let output = self
            .client
            .create_queue()
            .queue_name(name)
            .set_attributes(Some(to_sdk_attributes(attributes)))
            .send()
            .await
            .map_err(|e| classify(e, "CreateQueue", name, &self.errors))?;

        let url = output
            .queue_url()
            .ok_or_else(|| missing("CreateQueue", "QueueUrl"))?
            .to_string();

        info!(queue = %name, url = %url, "Created SQS queue");
        Ok(url)
    }

    async fn get_queue_address(&self, queue_url: &str) -> BackendResult<String> {
        self.attributes("GetQueueAttributes", queue_url, vec![QueueAttributeName::QueueArn])
            .await?
            .remove(QUEUE_ARN_ATTRIBUTE)
            .ok_or_else(|| missing("GetQueueAttributes", QUEUE_ARN_ATTRIBUTE))
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> BackendResult<HashMap<String, String>> {
        let names = names.iter().map(|n| QueueAttributeName::from(*n)).collect();
        self.attributes("GetQueueAttributes", queue_url, names).await
    }

    async fn set_attributes(
        &self,
        queue_url: &str,
        attributes: HashMap<String, String>,
    ) -> BackendResult<()> {
        self.client
            .set_queue_attributes()
            .queue_url(queue_url)
            .set_attributes(Some(to_sdk_attributes(attributes)))
            .send()
            .await
            .map_err(|e| classify(e, "SetQueueAttributes", queue_url, &self.errors))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> BackendResult<Vec<ReceivedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_secs)
            .visibility_timeout(request.visibility_timeout_secs)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| classify(e, "ReceiveMessage", queue_url, &self.errors))?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ReceivedMessage {
                    message_id: m.message_id().unwrap_or_default().to_string(),
                    receipt_handle: m.receipt_handle()?.to_string(),
                    body: m.body().map(str::to_string),
                })
            })
            .collect())
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> BackendResult<()> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| classify(e, "DeleteMessage", queue_url, &self.errors))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sdk_attributes_known_names() {
        let attrs = to_sdk_attributes(HashMap::from([
            ("Policy".to_string(), "{}".to_string()),
            ("ReceiveMessageWaitTimeSeconds".to_string(), "20".to_string()),
        ]));

        assert_eq!(attrs.get(&QueueAttributeName::Policy).map(String::as_str), Some("{}"));
        assert_eq!(
            attrs
                .get(&QueueAttributeName::ReceiveMessageWaitTimeSeconds)
                .map(String::as_str),
            Some("20")
        );
    }

    #[test]
    fn test_missing_field_error() {
        let err = missing("CreateTopic", "TopicArn");
        assert_eq!(err.to_string(), "CreateTopic failed: response carried no TopicArn");
    }
}
