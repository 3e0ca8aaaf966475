//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The channel an operation was issued on is no longer open.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The broker refused to start a consumer.
    #[error("Consume failed on queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue the consumer was declared against
        queue: String,
        /// Broker or transport supplied reason
        reason: String,
    },

    /// An acknowledgement frame could not be written.
    #[error("Acknowledgement failed for delivery {delivery_tag}: {reason}")]
    AcknowledgeFailed {
        /// The delivery tag being acknowledged
        delivery_tag: u64,
        /// Why the write failed
        reason: String,
    },

    /// Connection establishment timed out.
    #[error("Connection timed out after {timeout:?} while connecting to {endpoint}")]
    ConnectionTimeout {
        /// The endpoint being connected to
        endpoint: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Authentication with the broker failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested capability is not available.
    #[error("Transport not available: {0}")]
    NotAvailable(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether retrying the operation against the same or another host can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::ConnectionLost(_)
                | Self::ConnectionTimeout { .. }
                | Self::NotAvailable(_)
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
