//! Parameters handed to a transport when opening connections and consumers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-connection parameters, independent of which host is being dialed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Virtual host to open on the broker.
    pub virtual_host: String,

    /// User name for authentication.
    pub username: String,

    /// Password for authentication.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Heartbeat interval requested from the broker. `None` disables heartbeats.
    pub requested_heartbeat: Option<Duration>,

    /// Upper bound on a single connection attempt.
    pub timeout: Duration,

    /// Client properties announced during the handshake.
    #[serde(default)]
    pub client_properties: HashMap<String, String>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            requested_heartbeat: Some(Duration::from_secs(10)),
            timeout: Duration::from_secs(10),
            client_properties: HashMap::new(),
        }
    }
}

/// Options for a single protocol-level consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumeOptions {
    /// Consumer tag to register with. Empty lets the broker choose.
    pub consumer_tag: String,

    /// Channel prefetch (QoS) applied before consuming.
    pub prefetch_count: u16,

    /// Consumer priority, if the broker supports it.
    pub priority: Option<i32>,

    /// Request exclusive access to the queue.
    pub exclusive: bool,

    /// Extra `basic.consume` arguments.
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            consumer_tag: String::new(),
            prefetch_count: 50,
            priority: None,
            exclusive: false,
            arguments: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::default();
        assert_eq!(params.virtual_host, "/");
        assert_eq!(params.username, "guest");
        assert_eq!(params.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_password_not_serialized() {
        let params = ConnectionParams {
            password: "s3cret".to_string(),
            ..ConnectionParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("s3cret"));
    }
}
