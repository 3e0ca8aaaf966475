//! Consumers
//!
//! - [`PersistentConsumer`]: the application-facing logical consumer, kept alive
//!   across reconnects and broker cancellations
//! - [`InternalConsumer`]: one protocol-level subscription on one channel
//! - [`InternalConsumerFactory`]: creates internal consumers on the current
//!   connection and wires their deliveries to the [`ConsumerDispatcher`](crate::ConsumerDispatcher)
//! - [`MessageHandler`] / [`AckStrategy`]: the per-message callback and how its
//!   delivery is settled

mod handler;
mod internal;
mod persistent;

pub use handler::{AckStrategy, HandlerError, HandlerResult, MessageHandler};
pub use internal::{ConsumerId, InternalConsumer, InternalConsumerFactory};
pub use persistent::{ConsumerStatus, PersistentConsumer};
