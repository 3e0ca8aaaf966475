//! Message handler trait and acknowledgement outcome.
//!
//! A handler runs on the dispatcher's worker thread, one delivery at a time,
//! and decides how the delivery is settled:
//!
//! ```rust
//! use warren_client::consumer::{AckStrategy, HandlerResult};
//! use warren_client::{MessageProperties, ReceivedInfo};
//!
//! fn handle(body: &[u8], _props: &MessageProperties, info: &ReceivedInfo) -> HandlerResult {
//!     if body.is_empty() {
//!         return Ok(AckStrategy::NackWithoutRequeue);
//!     }
//!     tracing::info!(queue = %info.queue, "processing order");
//!     Ok(AckStrategy::Ack)
//! }
//! ```
//!
//! Returning `Err` or panicking is a handler fault: the delivery is nacked
//! without requeue and the fault is logged.

use serde::{Deserialize, Serialize};
use warren_transport_traits::{MessageProperties, ReceivedInfo};

/// How a delivery is settled once its handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStrategy {
    /// Acknowledge; the broker forgets the message.
    #[default]
    Ack,
    /// Reject and put the message back on the queue.
    NackWithRequeue,
    /// Reject and drop (or dead-letter) the message.
    NackWithoutRequeue,
}

/// Error returned by a failing handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of handling one delivery.
pub type HandlerResult = Result<AckStrategy, HandlerError>;

/// Per-message callback of a consumer.
///
/// Implemented for every `Fn(&[u8], &MessageProperties, &ReceivedInfo) -> HandlerResult`.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one delivery.
    fn handle(&self, body: &[u8], properties: &MessageProperties, info: &ReceivedInfo) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8], &MessageProperties, &ReceivedInfo) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, body: &[u8], properties: &MessageProperties, info: &ReceivedInfo) -> HandlerResult {
        self(body, properties, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rejecting;

    impl MessageHandler for Rejecting {
        fn handle(&self, _: &[u8], _: &MessageProperties, _: &ReceivedInfo) -> HandlerResult {
            Err("malformed payload".into())
        }
    }

    fn info() -> ReceivedInfo {
        ReceivedInfo {
            consumer_tag: "ctag".to_string(),
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "orders".to_string(),
            queue: "orders".to_string(),
        }
    }

    #[test]
    fn test_closures_are_handlers() {
        let handler = |body: &[u8], _: &MessageProperties, _: &ReceivedInfo| -> HandlerResult {
            Ok(if body == b"retry" {
                AckStrategy::NackWithRequeue
            } else {
                AckStrategy::Ack
            })
        };
        let props = MessageProperties::default();
        assert_eq!(handler.handle(b"retry", &props, &info()).unwrap(), AckStrategy::NackWithRequeue);
        assert_eq!(handler.handle(b"ok", &props, &info()).unwrap(), AckStrategy::Ack);
    }

    #[test]
    fn test_handler_errors_surface() {
        let err = Rejecting
            .handle(b"", &MessageProperties::default(), &info())
            .unwrap_err();
        assert_eq!(err.to_string(), "malformed payload");
    }

    #[test]
    fn test_ack_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&AckStrategy::NackWithoutRequeue).unwrap(),
            "\"nack_without_requeue\""
        );
    }
}
