//! Delivered message types.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Persistence mode requested by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Message may be lost on broker restart.
    #[default]
    Transient,
    /// Message is written to disk by the broker.
    Persistent,
}

/// Basic content-header properties carried by a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// MIME content type.
    pub content_type: Option<String>,
    /// MIME content encoding.
    pub content_encoding: Option<String>,
    /// Application headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, serde_json::Value>,
    /// Transient or persistent.
    pub delivery_mode: DeliveryMode,
    /// Message priority, 0 to 9.
    pub priority: Option<u8>,
    /// Application correlation identifier.
    pub correlation_id: Option<String>,
    /// Address to reply to.
    pub reply_to: Option<String>,
    /// Per-message TTL as set by the publisher.
    pub expiration: Option<String>,
    /// Application message identifier.
    pub message_id: Option<String>,
    /// Message timestamp, seconds since the epoch.
    pub timestamp: Option<u64>,
    /// Message type name.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Creating user id.
    pub user_id: Option<String>,
    /// Creating application id.
    pub app_id: Option<String>,
}

/// Routing and bookkeeping information attached to a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedInfo {
    /// Tag of the consumer the broker delivered to.
    pub consumer_tag: String,
    /// Channel-scoped delivery tag used for acknowledgement.
    pub delivery_tag: u64,
    /// Whether the broker has delivered this message before.
    pub redelivered: bool,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key used at publish time.
    pub routing_key: String,
    /// Queue the message was consumed from.
    pub queue: String,
}

/// A single message handed to a [`DeliverySink`](crate::DeliverySink).
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Raw message body.
    pub body: Bytes,
    /// Content-header properties.
    pub properties: MessageProperties,
    /// Routing information.
    pub info: ReceivedInfo,
}
