//! Core transport traits.
//!
//! The session layer treats these as an opaque capability set: it never looks
//! at frames, only at connections, channels, deliveries and signals.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::{ConnectionParams, ConsumeOptions};
use crate::error::TransportResult;
use crate::host::Host;
use crate::message::Delivery;
use crate::signals::{CancelReason, ConnectionSignal};

/// Opens connections to broker hosts.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a connection to `host`.
    ///
    /// Implementations should honor `params.timeout`; callers additionally bound
    /// the call with the same timeout.
    async fn open(
        &self,
        host: &Host,
        params: &ConnectionParams,
    ) -> TransportResult<Arc<dyn TransportConnection>>;
}

/// A live connection to a single broker host.
#[async_trait]
pub trait TransportConnection: Send + Sync + fmt::Debug {
    /// Returns `true` until the connection has been closed from either side.
    fn is_open(&self) -> bool;

    /// Subscribes to unsolicited signals for this connection.
    ///
    /// A `Shutdown` signal is the last signal a connection raises.
    fn signals(&self) -> broadcast::Receiver<ConnectionSignal>;

    /// Opens a new channel on this connection.
    async fn create_channel(&self) -> TransportResult<Arc<dyn TransportChannel>>;

    /// Closes the connection. Closing an already closed connection is not an error.
    async fn close(&self) -> TransportResult<()>;

    /// The host this connection is attached to.
    fn endpoint(&self) -> &Host;
}

/// A channel multiplexed over a [`TransportConnection`].
#[async_trait]
pub trait TransportChannel: Send + Sync + fmt::Debug {
    /// Returns `true` until the channel has been closed.
    fn is_open(&self) -> bool;

    /// Starts a consumer on `queue` and returns the consumer tag.
    ///
    /// Deliveries and cancellation are reported to `sink` from the transport's
    /// I/O context.
    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        sink: Arc<dyn DeliverySink>,
    ) -> TransportResult<String>;

    /// Cancels a consumer started on this channel.
    async fn cancel(&self, consumer_tag: &str) -> TransportResult<()>;

    /// Acknowledges a delivery. Writes the frame without waiting for the broker.
    fn ack(&self, delivery_tag: u64) -> TransportResult<()>;

    /// Rejects a delivery. Writes the frame without waiting for the broker.
    fn nack(&self, delivery_tag: u64, requeue: bool) -> TransportResult<()>;

    /// Closes the channel.
    async fn close(&self) -> TransportResult<()>;
}

/// Receives deliveries for one protocol-level consumer.
///
/// Both methods are called on the transport's I/O context and must return
/// promptly.
pub trait DeliverySink: Send + Sync {
    /// A message was delivered to the consumer.
    fn on_delivery(&self, delivery: Delivery);

    /// The consumer stopped receiving deliveries.
    fn on_cancelled(&self, reason: CancelReason);
}
