//! # Inbound Messages
//!
//! A delivered message and the handle used to settle it, plus decoding of the
//! message body into item descriptors.
//!
//! ## Wire Format
//!
//! The body is a UTF-8 JSON array of objects, each with at least a string `key`:
//!
//! ```json
//! [{"key": "uploads/a.jpg"}, {"key": "uploads/b.jpg", "source": "camera-2"}]
//! ```
//!
//! Fields other than `key` are preserved and passed to the processor unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::errors::BrokerResult;

/// One unit of work inside a message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Storage object to process
    pub key: String,
    /// Any additional fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            extra: Map::new(),
        }
    }
}

/// Message body decoding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Message body is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Message body must be a JSON array, found {found}")]
    NotAnArray { found: &'static str },

    #[error("Item {index} is not a valid descriptor: {reason}")]
    InvalidDescriptor { index: usize, reason: String },
}

/// Decode a raw message body into item descriptors
pub fn decode_body(body: &[u8]) -> Result<Vec<ItemDescriptor>, DecodeError> {
    let text = std::str::from_utf8(body).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    let Value::Array(items) = value else {
        return Err(DecodeError::NotAnArray {
            found: json_kind(&value),
        });
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|e| DecodeError::InvalidDescriptor {
                index,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Settles a delivery with the broker
///
/// Implementations only need to issue the call; [`InboundMessage`] guarantees
/// that at most one of `ack`/`reject` is ever invoked per delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    async fn ack(&self) -> BrokerResult<()>;
    async fn reject(&self) -> BrokerResult<()>;
}

/// A delivered message owned by this process until settled
///
/// `ack` and `reject` consume the message, so a delivery can be settled at most
/// once. A message dropped unsettled stays unacknowledged at the broker and is
/// redelivered when the channel closes; the drop is logged.
pub struct InboundMessage {
    delivery_tag: u64,
    redelivered: bool,
    body: Vec<u8>,
    acker: Option<Box<dyn Acknowledger>>,
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .field("settled", &self.acker.is_none())
            .finish()
    }
}

impl InboundMessage {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        body: Vec<u8>,
        acker: impl Acknowledger,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            acker: Some(Box::new(acker)),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker has delivered this message before
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decode the body into item descriptors
    pub fn decode(&self) -> Result<Vec<ItemDescriptor>, DecodeError> {
        decode_body(&self.body)
    }

    /// Acknowledge successful processing
    pub async fn ack(mut self) -> BrokerResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the message
    pub async fn reject(mut self) -> BrokerResult<()> {
        match self.acker.take() {
            Some(acker) => acker.reject().await,
            None => Ok(()),
        }
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        if self.acker.is_some() {
            warn!(
                delivery_tag = self.delivery_tag,
                "Message dropped without ack or reject - broker will redeliver it"
            );
        }
    }
}
