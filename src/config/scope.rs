//! Account/region scope and the resource identities derived from it.
//!
//! Identities are never stored. Every topic ARN, queue URL and queue ARN is
//! recomputed from `(region, account, channel)` so they cannot drift:
//! ```text
//! topic:     arn:aws:sns:{region}:{account}:{channel}
//! queue url: https://sqs.{region}.amazonaws.com/{account}/{channel}
//! queue arn: arn:aws:sqs:{region}:{account}:{channel}
//! ```

use serde::Deserialize;

/// Account and region every resource lives in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccountScope {
    /// AWS account id (e.g., "123456789012").
    pub account: String,
    /// AWS region (e.g., "us-east-1").
    pub region: String,
}

impl AccountScope {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// SNS topic ARN for a channel.
    pub fn topic_arn(&self, channel: &str) -> String {
        format!("arn:aws:sns:{}:{}:{}", self.region, self.account, channel)
    }

    /// SQS queue URL for a channel.
    pub fn queue_url(&self, channel: &str) -> String {
        format!(
            "https://sqs.{}.amazonaws.com/{}/{}",
            self.region, self.account, channel
        )
    }

    /// SQS queue ARN for a channel.
    pub fn queue_arn(&self, channel: &str) -> String {
        format!("arn:aws:sqs:{}:{}:{}", self.region, self.account, channel)
    }
}

/// Last segment of an ARN (the resource name).
pub fn arn_resource_name(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}
