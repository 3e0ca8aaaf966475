//! Persistent broker connection
//!
//! [`PersistentConnection`] keeps at most one transport connection open against
//! a cluster of broker hosts and retries forever in the background:
//!
//! ```text
//!        ┌────────────── new cycle: reset() ◄──── sleep(connect_interval) ◄──┐
//!        ▼                                                                    │
//!   open(current) ──ok──► success(); Connected ──► monitor signals            │
//!        │                                            │                       │
//!       err/timeout                               Shutdown ──► Disconnected ──┤ (no sleep)
//!        ▼                                                                    │
//!      next() ──true──► open(current)                                         │
//!        └──false─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lifecycle transitions are published on the [`EventBus`]. Connection
//! failures never reach callers; the only caller-visible errors are
//! [`Error::NoCandidates`] at construction and [`Error::TransportUnavailable`]
//! from [`create_channel`](PersistentConnection::create_channel).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warren_transport_traits::{
    ConnectionParams, ConnectionSignal, Host, Transport, TransportChannel, TransportConnection,
    TransportError,
};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::events::{
    ConnectionBlocked, ConnectionConnected, ConnectionDisconnected, ConnectionUnblocked,
};
use crate::host_selection::HostSelectionStrategy;
use crate::metrics::{AtomicConnectionStats, ConnectionStats};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// An attempt is in flight.
    Connecting,
    /// Connected and usable.
    Connected,
    /// Connected, but the broker is applying back-pressure.
    Blocked,
}

impl ConnectionState {
    /// `true` for `Connected` and `Blocked`.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Blocked)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

struct LiveConnection {
    host: Host,
    connection: Arc<dyn TransportConnection>,
}

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    params: ConnectionParams,
    attempt_timeout: Duration,
    connect_interval: Duration,
    strategy: Mutex<Box<dyn HostSelectionStrategy<Host>>>,
    state: watch::Sender<ConnectionState>,
    live: ArcSwapOption<LiveConnection>,
    bus: EventBus,
    stats: AtomicConnectionStats,
}

/// Keeps one broker connection alive across host outages.
///
/// ```rust
/// use std::sync::Arc;
/// use warren_client::{ConnectionConfig, EventBus, PersistentConnection};
/// use warren_transport_traits::Host;
/// use warren_transport_traits::memory::MemoryBroker;
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// broker.add_host(Host::new("rabbit-1", 5672));
///
/// let config = ConnectionConfig::new().with_host("rabbit-1", 5672);
/// let connection =
///     PersistentConnection::new(&config, Arc::new(broker.transport()), EventBus::new()).unwrap();
/// connection.start().unwrap();
///
/// let mut state = connection.watch_state();
/// state.wait_for(|s| s.is_connected()).await.unwrap();
/// assert_eq!(connection.current_host(), Some(Host::new("rabbit-1", 5672)));
/// connection.close().await;
/// # });
/// ```
pub struct PersistentConnection {
    inner: Arc<ConnectionInner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PersistentConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentConnection")
            .field("state", &self.state())
            .field("host", &self.current_host())
            .finish()
    }
}

impl PersistentConnection {
    /// Creates a connection for the hosts in `config`. Nothing is dialed until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`Error::NoCandidates`] when `config` has no hosts, or
    /// [`Error::Configuration`] for otherwise invalid settings.
    pub fn new(config: &ConnectionConfig, transport: Arc<dyn Transport>, bus: EventBus) -> Result<Self> {
        config.validate()?;
        let mut strategy = config.host_selection.build::<Host>();
        for host in config.candidate_hosts() {
            strategy.add(host);
        }
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                transport,
                params: config.connection_params(),
                attempt_timeout: config.timeout,
                connect_interval: config.connect_interval,
                strategy: Mutex::new(strategy),
                state,
                live: ArcSwapOption::empty(),
                bus,
                stats: AtomicConnectionStats::default(),
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Spawns the connect loop on the current tokio runtime. Idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::Worker`] outside a tokio runtime, [`Error::Disposed`] after
    /// [`close`](Self::close).
    pub fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Disposed("persistent connection"));
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Worker(format!("connect loop: {e}")))?;
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *task = Some(runtime.spawn(async move { inner.run(cancel).await }));
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether a connection is established (`Connected` or `Blocked`).
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watches state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The host currently connected to.
    pub fn current_host(&self) -> Option<Host> {
        self.inner.live.load().as_ref().map(|live| live.host.clone())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    /// Opens a channel on the live connection. Does not wait or retry.
    ///
    /// # Errors
    ///
    /// [`Error::TransportUnavailable`] when not connected, or the transport's
    /// error if the channel cannot be opened.
    pub async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>> {
        let live = self
            .inner
            .live
            .load_full()
            .filter(|live| live.connection.is_open())
            .ok_or_else(|| Error::TransportUnavailable(format!("connection is {}", self.state())))?;
        Ok(live.connection.create_channel().await?)
    }

    /// Stops the connect loop and closes the live connection.
    ///
    /// No further events are published. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "connect loop terminated abnormally");
        }
        // covers a connection that was never started
        self.inner.shut_down().await;
    }
}

impl Drop for PersistentConnection {
    fn drop(&mut self) {
        // the loop closes the live connection on its way out
        self.cancel.cancel();
    }
}

impl ConnectionInner {
    async fn run(&self, cancel: CancellationToken) {
        info!("connect loop started");
        loop {
            let Some((live, signals)) = self.establish(&cancel).await else {
                break;
            };
            if !self.monitor(&live, signals, &cancel).await {
                break;
            }
        }
        self.shut_down().await;
        info!("connect loop stopped");
    }

    /// Runs failover cycles until a host accepts. `None` when cancelled.
    async fn establish(
        &self,
        cancel: &CancellationToken,
    ) -> Option<(Arc<LiveConnection>, broadcast::Receiver<ConnectionSignal>)> {
        loop {
            self.strategy.lock().reset();
            loop {
                let host = match self.strategy.lock().current() {
                    Ok(host) => host.clone(),
                    Err(e) => {
                        warn!(error = %e, "no host to connect to");
                        return None;
                    }
                };
                self.set_state(ConnectionState::Connecting);
                AtomicConnectionStats::incr(&self.stats.attempts);
                debug!(host = %host, "connecting");

                let attempt = tokio::select! {
                    () = cancel.cancelled() => return None,
                    attempt = tokio::time::timeout(
                        self.attempt_timeout,
                        self.transport.open(&host, &self.params),
                    ) => attempt,
                };
                let failure = match attempt {
                    Ok(Ok(connection)) => {
                        // a shutdown raised before subscribing is never replayed
                        let signals = connection.signals();
                        if connection.is_open() {
                            self.strategy.lock().success();
                            let live = Arc::new(LiveConnection {
                                host: host.clone(),
                                connection,
                            });
                            self.live.store(Some(Arc::clone(&live)));
                            AtomicConnectionStats::incr(&self.stats.connects);
                            self.set_state(ConnectionState::Connected);
                            info!(host = %host, "connected to broker");
                            self.bus.publish(ConnectionConnected { host });
                            return Some((live, signals));
                        }
                        if let Err(e) = connection.close().await {
                            debug!(host = %host, error = %e, "error closing dead connection");
                        }
                        TransportError::ConnectionLost("closed right after opening".to_string())
                    }
                    Ok(Err(e)) => e,
                    Err(_) => TransportError::ConnectionTimeout {
                        endpoint: host.to_string(),
                        timeout: self.attempt_timeout,
                    },
                };
                warn!(host = %host, error = %failure, "connection attempt failed");
                AtomicConnectionStats::incr(&self.stats.failed_attempts);
                if !self.strategy.lock().next() {
                    break;
                }
            }

            self.set_state(ConnectionState::Disconnected);
            warn!(
                retry_in = ?self.connect_interval,
                "every broker host failed, retrying"
            );
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.connect_interval) => {}
            }
        }
    }

    /// Follows signals until the connection shuts down. `false` when cancelled.
    async fn monitor(
        &self,
        live: &LiveConnection,
        mut signals: broadcast::Receiver<ConnectionSignal>,
        cancel: &CancellationToken,
    ) -> bool {
        let reason = if live.connection.is_open() {
            loop {
                let signal = tokio::select! {
                    () = cancel.cancelled() => return false,
                    signal = signals.recv() => signal,
                };
                match signal {
                    Ok(ConnectionSignal::Shutdown { reason }) => break reason,
                    Ok(ConnectionSignal::Blocked { reason }) => {
                        AtomicConnectionStats::incr(&self.stats.blocks);
                        self.set_state(ConnectionState::Blocked);
                        warn!(host = %live.host, reason = %reason, "connection blocked by broker");
                        self.bus.publish(ConnectionBlocked { reason });
                    }
                    Ok(ConnectionSignal::Unblocked) => {
                        self.set_state(ConnectionState::Connected);
                        info!(host = %live.host, "connection unblocked");
                        self.bus.publish(ConnectionUnblocked);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(host = %live.host, missed, "connection signals lagged");
                        if !live.connection.is_open() {
                            break "connection closed while signals lagged".to_string();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break "signal stream closed".to_string();
                    }
                }
            }
        } else {
            "connection closed before monitoring started".to_string()
        };

        self.live.store(None);
        AtomicConnectionStats::incr(&self.stats.disconnects);
        self.set_state(ConnectionState::Disconnected);
        warn!(host = %live.host, reason = %reason, "connection lost");
        self.bus.publish(ConnectionDisconnected {
            host: live.host.clone(),
            reason,
        });
        true
    }

    async fn shut_down(&self) {
        if let Some(live) = self.live.swap(None) {
            if let Err(e) = live.connection.close().await {
                debug!(host = %live.host, error = %e, "error closing connection");
            }
            info!(host = %live.host, "connection closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warren_transport_traits::memory::MemoryBroker;

    fn config(hosts: &[&Host]) -> ConnectionConfig {
        hosts
            .iter()
            .fold(ConnectionConfig::new(), |config, host| {
                config.with_host(host.address(), host.port())
            })
            .with_connect_interval(Duration::from_millis(20))
            .with_timeout(Duration::from_secs(1))
    }

    async fn wait_for_state(connection: &PersistentConnection, wanted: ConnectionState) {
        let mut watch = connection.watch_state();
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| *s == wanted))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[test]
    fn test_no_hosts_is_rejected() {
        let broker = MemoryBroker::new();
        let err = PersistentConnection::new(
            &ConnectionConfig::new(),
            Arc::new(broker.transport()),
            EventBus::new(),
        )
        .unwrap_err();
        assert_eq!(err, Error::NoCandidates);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let broker = MemoryBroker::new();
        let host = Host::new("a", 5672);
        let connection =
            PersistentConnection::new(&config(&[&host]), Arc::new(broker.transport()), EventBus::new())
                .unwrap();
        assert!(matches!(connection.start(), Err(Error::Worker(_))));
    }

    #[tokio::test]
    async fn test_connects_and_closes() {
        let broker = MemoryBroker::new();
        let host = Host::new("a", 5672);
        broker.add_host(host.clone());
        let connection =
            PersistentConnection::new(&config(&[&host]), Arc::new(broker.transport()), EventBus::new())
                .unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.start().unwrap();
        connection.start().unwrap();
        wait_for_state(&connection, ConnectionState::Connected).await;
        assert_eq!(connection.current_host(), Some(host.clone()));
        assert!(connection.create_channel().await.is_ok());

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(broker.open_connections().is_empty());
        assert!(matches!(connection.start(), Err(Error::Disposed(_))));
        assert!(matches!(
            connection.create_channel().await,
            Err(Error::TransportUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_channel_without_connection() {
        let broker = MemoryBroker::new();
        let host = Host::new("a", 5672);
        let connection =
            PersistentConnection::new(&config(&[&host]), Arc::new(broker.transport()), EventBus::new())
                .unwrap();
        connection.start().unwrap();
        let err = connection.create_channel().await.unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_blocked_is_still_connected() {
        let broker = MemoryBroker::new();
        let host = Host::new("a", 5672);
        broker.add_host(host.clone());
        let connection =
            PersistentConnection::new(&config(&[&host]), Arc::new(broker.transport()), EventBus::new())
                .unwrap();
        connection.start().unwrap();
        wait_for_state(&connection, ConnectionState::Connected).await;

        broker.block(&host, "low on memory");
        wait_for_state(&connection, ConnectionState::Blocked).await;
        assert!(connection.is_connected());

        broker.unblock(&host);
        wait_for_state(&connection, ConnectionState::Connected).await;
        assert_eq!(connection.stats().blocks, 1);
        connection.close().await;
    }
}
