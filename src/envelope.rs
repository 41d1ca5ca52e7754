//! Message envelope encoding and decoding.
//!
//! Published bodies are `{"data": <payload>, "channel": "<name>"}`. SNS wraps
//! the body in its notification JSON (`{"Type": "Notification", "Message":
//! "<body>", ...}`) on the way into the queue unless raw delivery is enabled,
//! so decoding peels the transport layer first and accepts both.
//!
//! Messages published before channel tagging carry the bare payload; they
//! decode with `channel = None`. A notification whose `Message` is not JSON
//! at all decodes the same way, with the text as a string payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field of the SNS notification JSON holding the published body.
const NOTIFICATION_MESSAGE_FIELD: &str = "Message";

/// Wire form of a published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    pub channel: Option<String>,
}

impl Envelope {
    pub fn new(data: Value, channel: impl Into<String>) -> Self {
        Self {
            data,
            channel: Some(channel.into()),
        }
    }

    /// Serialize to the message body.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a published body (without the transport wrapper).
    ///
    /// An object with a `data` key and a string or null `channel` key is an
    /// envelope; any other JSON value is a legacy payload.
    pub fn decode_payload(payload: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(payload).map_err(DecodeError::Payload)?;
        Ok(Self::from_value(value))
    }

    fn from_value(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Self {
                    data: other,
                    channel: None,
                }
            }
        };

        let channel = match map.get("channel") {
            Some(Value::String(channel)) => Some(Some(channel.clone())),
            Some(Value::Null) => Some(None),
            _ => None,
        };

        match (channel, map.remove("data")) {
            (Some(channel), Some(data)) => Self { data, channel },
            (_, data) => {
                if let Some(data) = data {
                    map.insert("data".to_string(), data);
                }
                Self {
                    data: Value::Object(map),
                    channel: None,
                }
            }
        }
    }

    pub fn into_consumable(self) -> Consumable {
        Consumable {
            msg: self.data,
            channel: self.channel,
        }
    }
}

/// What a handler receives.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumable {
    pub msg: Value,
    /// Producer channel; `None` for legacy messages.
    pub channel: Option<String>,
}

/// A queue message body that cannot be turned into a `Consumable`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message has no body")]
    MissingBody,

    #[error("Transport envelope is not valid JSON: {0}")]
    Transport(#[source] serde_json::Error),

    #[error("Payload is not valid JSON: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Decode a queue message body into a `Consumable`.
pub fn decode_body(body: Option<&str>) -> Result<Consumable, DecodeError> {
    let body = body.ok_or(DecodeError::MissingBody)?;
    let outer: Value = serde_json::from_str(body).map_err(DecodeError::Transport)?;

    let envelope = match outer.get(NOTIFICATION_MESSAGE_FIELD).and_then(Value::as_str) {
        Some(inner) => match serde_json::from_str::<Value>(inner) {
            Ok(value) => Envelope::from_value(value),
            // Plain text published by hand is a legacy payload too.
            Err(_) => Envelope {
                data: Value::String(inner.to_string()),
                channel: None,
            },
        },
        // Raw delivery: the body is the published payload itself.
        None => Envelope::from_value(outer),
    };

    Ok(envelope.into_consumable())
}
