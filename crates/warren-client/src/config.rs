//! Session configuration
//!
//! Configuration is plain data: build it in code, or deserialize it from the
//! application's own configuration file with serde. Parsing connection strings
//! is left to the application.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warren_transport_traits::{ConnectionParams, ConsumeOptions, Host};

use crate::error::{Error, Result};
use crate::host_selection::HostSelection;

/// A broker host entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    5672
}

impl HostConfig {
    /// Creates a host entry.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<&HostConfig> for Host {
    fn from(config: &HostConfig) -> Self {
        Host::new(config.host.clone(), config.port)
    }
}

/// Configuration for a [`PersistentConnection`](crate::PersistentConnection)
/// and the consumers attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Candidate broker hosts, in preference order.
    pub hosts: Vec<HostConfig>,
    /// Virtual host.
    pub virtual_host: String,
    /// User name.
    pub username: String,
    /// Password.
    #[serde(skip_serializing)]
    pub password: String,
    /// Requested heartbeat. `None` disables heartbeats.
    pub requested_heartbeat: Option<Duration>,
    /// Upper bound on a single connection attempt.
    pub timeout: Duration,
    /// Delay before starting a new cycle once every host has failed.
    pub connect_interval: Duration,
    /// Default prefetch count for consumers.
    pub prefetch_count: u16,
    /// How hosts are iterated on failover.
    pub host_selection: HostSelection,
    /// Product name announced to the broker.
    pub product: String,
    /// Platform announced to the broker.
    pub platform: String,
    /// Name of the consumer dispatcher's worker thread.
    pub dispatcher_thread_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            requested_heartbeat: Some(Duration::from_secs(10)),
            timeout: Duration::from_secs(10),
            connect_interval: Duration::from_secs(5),
            prefetch_count: 50,
            host_selection: HostSelection::Ordered,
            product: env!("CARGO_PKG_NAME").to_string(),
            platform: std::env::consts::OS.to_string(),
            dispatcher_thread_name: "warren-consumer-dispatcher".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Creates a default configuration with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a candidate host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.hosts.push(HostConfig::new(host, port));
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the virtual host.
    #[must_use]
    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }

    /// Sets the per-attempt connection timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delay between exhausted failover cycles.
    #[must_use]
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Sets the default consumer prefetch count.
    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Sets the host selection strategy.
    #[must_use]
    pub fn with_host_selection(mut self, selection: HostSelection) -> Self {
        self.host_selection = selection;
        self
    }

    /// Checks the configuration for values the session cannot work with.
    ///
    /// # Errors
    ///
    /// - [`Error::NoCandidates`] when no hosts are configured.
    /// - [`Error::Configuration`] for an empty host name, a zero port, a zero
    ///   prefetch count or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::NoCandidates);
        }
        for host in &self.hosts {
            if host.host.trim().is_empty() {
                return Err(Error::Configuration("host name must not be empty".to_string()));
            }
            if host.port == 0 {
                return Err(Error::Configuration(format!(
                    "host '{}' has port 0",
                    host.host
                )));
            }
        }
        if self.prefetch_count == 0 {
            return Err(Error::Configuration(
                "prefetch_count must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration("timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Candidate hosts as transport hosts.
    pub fn candidate_hosts(&self) -> Vec<Host> {
        self.hosts.iter().map(Host::from).collect()
    }

    /// Host-independent parameters handed to the transport.
    pub fn connection_params(&self) -> ConnectionParams {
        let mut client_properties = HashMap::new();
        client_properties.insert("product".to_string(), self.product.clone());
        client_properties.insert("platform".to_string(), self.platform.clone());
        client_properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        ConnectionParams {
            virtual_host: self.virtual_host.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            requested_heartbeat: self.requested_heartbeat,
            timeout: self.timeout,
            client_properties,
        }
    }
}

/// Per-consumer options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Overrides [`ConnectionConfig::prefetch_count`].
    pub prefetch_count: Option<u16>,
    /// Consumer priority.
    pub priority: Option<i32>,
    /// Exclusive consumer.
    pub exclusive: bool,
    /// Prefix for generated consumer tags. Each internal consumer gets a fresh tag.
    pub consumer_tag_prefix: Option<String>,
    /// Extra consume arguments.
    pub arguments: HashMap<String, serde_json::Value>,
}

impl ConsumerConfig {
    /// Sets the prefetch count.
    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = Some(prefetch_count);
        self
    }

    /// Sets the consumer priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Marks the consumer exclusive.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the consumer tag prefix.
    #[must_use]
    pub fn with_consumer_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_tag_prefix = Some(prefix.into());
        self
    }

    pub(crate) fn consume_options(&self, default_prefetch: u16) -> ConsumeOptions {
        let consumer_tag = self
            .consumer_tag_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}-{}", uuid::Uuid::new_v4().simple()))
            .unwrap_or_default();
        ConsumeOptions {
            consumer_tag,
            prefetch_count: self.prefetch_count.unwrap_or(default_prefetch),
            priority: self.priority,
            exclusive: self.exclusive,
            arguments: self.arguments.clone(),
        }
    }
}
