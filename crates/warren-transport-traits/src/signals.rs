//! Unsolicited signals raised by a transport connection or channel.

use std::fmt;

/// Signals a live connection raises without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The connection was closed by the broker, the network or a heartbeat timeout.
    Shutdown {
        /// Human readable close reason.
        reason: String,
    },
    /// The broker stopped accepting publishes (resource alarm).
    Blocked {
        /// Broker supplied reason, e.g. "low on memory".
        reason: String,
    },
    /// The broker resumed accepting publishes.
    Unblocked,
}

/// Why a protocol-level consumer stopped receiving deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The broker sent `basic.cancel`, e.g. the queue was deleted or a node failed.
    BrokerCancelled,
    /// The channel carrying the consumer closed with an error.
    ChannelError(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokerCancelled => write!(f, "cancelled by broker"),
            Self::ChannelError(reason) => write!(f, "channel error: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reason_display() {
        assert_eq!(CancelReason::BrokerCancelled.to_string(), "cancelled by broker");
        assert_eq!(
            CancelReason::ChannelError("PRECONDITION_FAILED".into()).to_string(),
            "channel error: PRECONDITION_FAILED"
        );
    }
}
