//! Session composition root
//!
//! A [`Session`] wires the event bus, the persistent connection, the shared
//! consumer dispatcher and the consumer factory together with explicit
//! constructor arguments. Applications normally create one session per broker
//! cluster.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;
use warren_transport_traits::{Transport, TransportChannel};

use crate::config::{ConnectionConfig, ConsumerConfig};
use crate::connection::{ConnectionState, PersistentConnection};
use crate::consumer::{InternalConsumerFactory, MessageHandler, PersistentConsumer};
use crate::dispatcher::ConsumerDispatcher;
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::metrics::{ConnectionStats, DispatcherStats};

/// A resilient broker session.
pub struct Session {
    bus: EventBus,
    connection: Arc<PersistentConnection>,
    dispatcher: Arc<ConsumerDispatcher>,
    factory: Arc<InternalConsumerFactory>,
    runtime: Handle,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Session {
    /// Builds a session and starts connecting in the background.
    ///
    /// Returns as soon as the connect loop is running; use
    /// [`wait_connected`](Self::wait_connected) or the
    /// [`ConnectionConnected`](crate::events::ConnectionConnected) event to learn
    /// when the first connection is up.
    ///
    /// # Errors
    ///
    /// - [`Error::NoCandidates`] / [`Error::Configuration`] for invalid configuration
    /// - [`Error::Worker`] outside a tokio runtime or if the dispatcher thread
    ///   cannot be spawned
    pub fn connect(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::connect_with_bus(config, transport, EventBus::new())
    }

    /// Like [`connect`](Self::connect), publishing on a caller-provided bus.
    ///
    /// Subscribe to the bus before calling this to observe the first
    /// `ConnectionConnected`.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn connect_with_bus(
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        bus: EventBus,
    ) -> Result<Self> {
        let runtime =
            Handle::try_current().map_err(|e| Error::Worker(format!("session: {e}")))?;
        let connection = Arc::new(PersistentConnection::new(&config, transport, bus.clone())?);
        let dispatcher = Arc::new(ConsumerDispatcher::with_event_bus(
            config.dispatcher_thread_name.clone(),
            &bus,
        )?);
        let factory = Arc::new(InternalConsumerFactory::new(
            Arc::clone(&connection),
            Arc::clone(&dispatcher),
            bus.clone(),
            config.prefetch_count,
            config.connect_interval,
        ));
        connection.start()?;
        info!(hosts = config.hosts.len(), "session started");

        Ok(Self {
            bus,
            connection,
            dispatcher,
            factory,
            runtime,
        })
    }

    /// Starts a persistent consumer on `queue`.
    ///
    /// The consumer attaches now if the connection is up, and otherwise on the
    /// next connect. Dropping the returned handle disposes it.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] if the dispatcher has been shut down.
    pub fn consume<H>(
        &self,
        queue: impl Into<String>,
        config: ConsumerConfig,
        handler: H,
    ) -> Result<PersistentConsumer>
    where
        H: MessageHandler,
    {
        if self.dispatcher.is_disposed() {
            return Err(Error::Disposed("session"));
        }
        let consumer = PersistentConsumer::new(
            queue,
            config,
            Arc::new(handler),
            Arc::clone(&self.factory),
            self.runtime.clone(),
        );
        consumer.start_consuming()?;
        Ok(consumer)
    }

    /// Opens a channel for publishing. Does not wait for a connection.
    ///
    /// # Errors
    ///
    /// [`Error::TransportUnavailable`] while disconnected.
    pub async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>> {
        self.connection.create_channel().await
    }

    /// Waits until the connection is up.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] if the connection is closed while waiting.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut state = self.connection.watch_state();
        state
            .wait_for(|s| s.is_connected())
            .await
            .map(|_| ())
            .map_err(|_| Error::Disposed("persistent connection"))
    }

    /// The session's event bus.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// The underlying persistent connection.
    pub fn connection(&self) -> &PersistentConnection {
        &self.connection
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection counters.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    /// Dispatcher counters.
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Shuts down the dispatcher and the connection.
    ///
    /// Consumers created from this session stop receiving deliveries; dispose
    /// them first to cancel their subscriptions cleanly.
    pub async fn close(&self) {
        self.dispatcher.dispose();
        self.connection.close().await;
        info!("session closed");
    }
}
