//! Client error types.

use thiserror::Error;
use warren_transport_traits::TransportError;

/// A specialized `Result` type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session layer.
///
/// Transport faults are recovered internally by the reconnect loop and consumer
/// self-healing; only the variants below ever reach callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// No broker hosts are configured.
    #[error("No candidate hosts configured")]
    NoCandidates,

    /// A synchronous API needed a live connection and there was none.
    #[error("Broker connection is not available: {0}")]
    TransportUnavailable(String),

    /// A protocol-level consumer could not be started. Transient.
    #[error("Failed to start consuming from '{queue}': {reason}")]
    ConsumerStartFailed {
        /// Queue the consumer targets
        queue: String,
        /// Underlying failure
        reason: String,
    },

    /// A user callback or event handler failed.
    #[error("Handler fault: {0}")]
    HandlerFault(String),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A background worker (dispatcher thread or connect loop) could not be started.
    #[error("Failed to start background worker: {0}")]
    Worker(String),

    /// The component has been disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// An error bubbled up from the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Creates a handler fault from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::HandlerFault(message)
    }
}
