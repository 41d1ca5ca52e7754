//! Queue access policies granting a topic permission to deliver.
//!
//! The canonical grant for a `(queue, topic)` pair:
//! ```json
//! {
//!   "Sid": "Allow-SNS-SendMessage-orders",
//!   "Effect": "Allow",
//!   "Principal": "*",
//!   "Action": ["SQS:SendMessage"],
//!   "Resource": "arn:aws:sqs:us-east-1:123456789012:billing",
//!   "Condition": { "ArnEquals": { "aws:SourceArn": "arn:aws:sns:us-east-1:123456789012:orders" } }
//! }
//! ```
//!
//! The backend may hand back a policy in a different but equivalent shape
//! (scalar `Action`, `{"AWS": "*"}` principal, a single `Statement` object), so
//! comparison normalizes before checking equality. Statements that are not
//! ours are kept verbatim when the canonical grant is merged in.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::config::arn_resource_name;

/// Policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action a topic needs on a subscriber queue.
pub const SEND_MESSAGE_ACTION: &str = "SQS:SendMessage";

/// Either a scalar or a list; IAM accepts both for most fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    // Many first: an untagged scalar arm could otherwise swallow an array.
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => std::slice::from_ref(value),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(values) => values,
            OneOrMany::One(value) => vec![value],
        }
    }
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement id. Informational; never compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    pub principal: Value,
    pub action: OneOrMany<String>,
    pub resource: OneOrMany<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Any other keys, kept so foreign statements round-trip intact.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Statement {
    /// Structural equality ignoring `Sid`, statement shape and action case.
    pub fn grants_same_as(&self, other: &Statement) -> bool {
        self.effect == other.effect
            && normalize_principal(&self.principal) == normalize_principal(&other.principal)
            && action_set(&self.action) == action_set(&other.action)
            && resource_set(&self.resource) == resource_set(&other.resource)
            && self.condition == other.condition
            && self.other == other.other
    }
}

/// A statement entry that may or may not fit the `Statement` shape
/// (e.g. `NotPrincipal` grants). Unparsed entries are carried as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatementEntry {
    Parsed(Statement),
    Raw(Value),
}

impl StatementEntry {
    pub fn as_statement(&self) -> Option<&Statement> {
        match self {
            StatementEntry::Parsed(statement) => Some(statement),
            StatementEntry::Raw(_) => None,
        }
    }

    pub fn sid(&self) -> Option<&str> {
        match self {
            StatementEntry::Parsed(statement) => statement.sid.as_deref(),
            StatementEntry::Raw(value) => value.get("Sid").and_then(Value::as_str),
        }
    }
}

/// A queue access policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "one_or_many_statements")]
    pub statement: Vec<StatementEntry>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

fn one_or_many_statements<'de, D>(deserializer: D) -> Result<Vec<StatementEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany<StatementEntry>>::deserialize(deserializer)?
        .map(OneOrMany::into_vec)
        .unwrap_or_default())
}

impl PolicyDocument {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Statements that fit the `Statement` shape.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.statement.iter().filter_map(StatementEntry::as_statement)
    }

    /// True when some statement grants the same as `expected`.
    pub fn contains_statement(&self, expected: &Statement) -> bool {
        self.statements().any(|s| s.grants_same_as(expected))
    }

    /// Add `statement`, replacing only an entry carrying the same `Sid`.
    pub fn merge_statement(&mut self, statement: Statement) {
        if let Some(sid) = statement.sid.as_deref() {
            self.statement.retain(|entry| entry.sid() != Some(sid));
        }
        self.statement.push(StatementEntry::Parsed(statement));
    }
}

/// `Sid` of the grant for a topic. Unique per topic so grants from several
/// producer topics can live on one queue.
pub fn statement_sid(topic_arn: &str) -> String {
    format!("Allow-SNS-SendMessage-{}", arn_resource_name(topic_arn))
}

/// Canonical statement letting `topic_arn` send into `queue_address`.
pub fn build_statement(queue_address: &str, topic_arn: &str) -> Statement {
    Statement {
        sid: Some(statement_sid(topic_arn)),
        effect: "Allow".to_string(),
        principal: Value::String("*".to_string()),
        action: OneOrMany::Many(vec![SEND_MESSAGE_ACTION.to_string()]),
        resource: OneOrMany::One(queue_address.to_string()),
        condition: Some(json!({ "ArnEquals": { "aws:SourceArn": topic_arn } })),
        other: Map::new(),
    }
}

/// Canonical policy document for a subscriber queue.
///
/// `channel` only feeds the document `Id`, which is never compared.
pub fn build_policy(queue_address: &str, topic_arn: &str, channel: &str) -> PolicyDocument {
    PolicyDocument {
        version: Some(POLICY_VERSION.to_string()),
        id: Some(format!("sns.{}.queue", channel)),
        statement: vec![StatementEntry::Parsed(build_statement(queue_address, topic_arn))],
        other: Map::new(),
    }
}

fn action_set(action: &OneOrMany<String>) -> BTreeSet<String> {
    action.as_slice().iter().map(|a| a.to_ascii_lowercase()).collect()
}

fn resource_set(resource: &OneOrMany<String>) -> BTreeSet<&str> {
    resource.as_slice().iter().map(String::as_str).collect()
}

// "*" and {"AWS": "*"} both mean anyone.
fn normalize_principal(principal: &Value) -> Value {
    match principal {
        Value::String(s) if s == "*" => json!({ "AWS": ["*"] }),
        Value::Object(map) => {
            let normalized = map
                .iter()
                .map(|(key, value)| {
                    let mut values: Vec<Value> = match value {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    values.sort_by_key(|v| v.to_string());
                    (key.clone(), Value::Array(values))
                })
                .collect::<Map<String, Value>>();
            Value::Object(normalized)
        }
        other => other.clone(),
    }
}
