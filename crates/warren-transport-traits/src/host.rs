//! Broker host addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default AMQP port.
pub const DEFAULT_PORT: u16 = 5672;

/// A broker cluster member's network address and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    address: String,
    port: u16,
}

impl Host {
    /// Creates a host from an address and port.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Creates a host on the default AMQP port.
    pub fn with_default_port(address: impl Into<String>) -> Self {
        Self::new(address, DEFAULT_PORT)
    }

    /// The host name or IP address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The TCP port.
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
