//! Events published on the [`EventBus`](crate::EventBus).
//!
//! Connection lifecycle events come from [`PersistentConnection`](crate::PersistentConnection);
//! consumer events come from persistent and internal consumers.

use warren_transport_traits::Host;

use crate::consumer::AckStrategy;

/// A connection to `host` was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConnected {
    /// The broker host now serving the session.
    pub host: Host,
}

/// The connection to `host` was lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDisconnected {
    /// The host that was serving the session.
    pub host: Host,
    /// Close reason reported by the transport.
    pub reason: String,
}

/// The broker raised a resource alarm; publishes will stall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBlocked {
    /// Broker supplied reason.
    pub reason: String,
}

/// The broker cleared its resource alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionUnblocked;

/// A protocol-level consumer started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartConsumingSucceeded {
    /// Queue being consumed.
    pub queue: String,
    /// Broker consumer tag.
    pub consumer_tag: String,
}

/// A protocol-level consumer failed to start. It is retried on the next
/// `ConnectionConnected` or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartConsumingFailed {
    /// Queue that was targeted.
    pub queue: String,
    /// Failure description.
    pub reason: String,
}

/// A protocol-level consumer was cancelled by the broker or lost its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerCancelled {
    /// Queue being consumed.
    pub queue: String,
    /// Broker consumer tag.
    pub consumer_tag: String,
    /// Cancellation reason.
    pub reason: String,
}

/// A delivery was settled after its callback ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAcknowledged {
    /// Queue the delivery came from.
    pub queue: String,
    /// Channel-scoped delivery tag.
    pub delivery_tag: u64,
    /// How it was settled.
    pub outcome: AckStrategy,
}
