//! Connection attempts that fail after `open` returns or never return at all.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Recorder, config_for, eventually, init_tracing};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use warren_client::events::{ConnectionConnected, ConnectionDisconnected};
use warren_client::{ConnectionState, EventBus, Host, PersistentConnection};
use warren_transport_traits::memory::MemoryBroker;
use warren_transport_traits::{
    ConnectionParams, ConnectionSignal, Transport, TransportChannel, TransportConnection,
    TransportError, TransportResult,
};

/// A connection whose shutdown was raised before anyone subscribed.
#[derive(Debug)]
struct ClosedConnection {
    host: Host,
    signals: broadcast::Sender<ConnectionSignal>,
}

#[async_trait]
impl TransportConnection for ClosedConnection {
    fn is_open(&self) -> bool {
        false
    }

    fn signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signals.subscribe()
    }

    async fn create_channel(&self) -> TransportResult<Arc<dyn TransportChannel>> {
        Err(TransportError::ConnectionLost("closed".to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(())
    }

    fn endpoint(&self) -> &Host {
        &self.host
    }
}

/// Hands out `dead` already-closed connections, then defers to `inner`.
#[derive(Debug)]
struct DiesDuringHandshake {
    inner: Arc<dyn Transport>,
    dead: AtomicUsize,
    opened: AtomicUsize,
    // senders stay alive so receivers never observe `Closed`
    senders: Mutex<Vec<broadcast::Sender<ConnectionSignal>>>,
}

impl DiesDuringHandshake {
    fn new(inner: Arc<dyn Transport>, dead: usize) -> Self {
        Self {
            inner,
            dead: AtomicUsize::new(dead),
            opened: AtomicUsize::new(0),
            senders: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for DiesDuringHandshake {
    async fn open(
        &self,
        host: &Host,
        params: &ConnectionParams,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let dies = self
            .dead
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !dies {
            return self.inner.open(host, params).await;
        }
        let (signals, _) = broadcast::channel(4);
        // nobody is subscribed yet, so this signal is lost
        let _ = signals.send(ConnectionSignal::Shutdown {
            reason: "died during handshake".to_string(),
        });
        self.senders.lock().push(signals.clone());
        Ok(Arc::new(ClosedConnection {
            host: host.clone(),
            signals,
        }))
    }
}

/// Never completes an attempt.
#[derive(Debug, Default)]
struct Unresponsive {
    opened: AtomicUsize,
}

#[async_trait]
impl Transport for Unresponsive {
    async fn open(
        &self,
        _host: &Host,
        _params: &ConnectionParams,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_connection_closed_before_subscribing_is_retried() {
    init_tracing();
    let broker = MemoryBroker::new();
    let host = Host::new("rabbit-a", 5672);
    broker.add_host(host.clone());
    let transport = Arc::new(DiesDuringHandshake::new(Arc::new(broker.transport()), 2));

    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let disconnected = Recorder::<ConnectionDisconnected>::new(&bus);
    let connection =
        PersistentConnection::new(&config_for(&[&host]), transport.clone(), bus.clone()).unwrap();
    connection.start().unwrap();

    eventually("a live connection", || {
        connection.state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(transport.opened.load(Ordering::SeqCst), 3);
    assert_eq!(connected.len(), 1);
    assert_eq!(disconnected.len(), 0);

    let stats = connection.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.disconnects, 0);
    assert_eq!(broker.open_connections(), vec![host]);
    connection.close().await;
}

#[tokio::test]
async fn test_unresponsive_host_times_out_and_retries() {
    init_tracing();
    let host = Host::new("rabbit-a", 5672);
    let transport = Arc::new(Unresponsive::default());
    let config = config_for(&[&host]).with_timeout(Duration::from_millis(30));

    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let connection = PersistentConnection::new(&config, transport.clone(), bus.clone()).unwrap();
    connection.start().unwrap();

    eventually("three timed out attempts", || {
        connection.stats().failed_attempts >= 3
    })
    .await;
    assert!(transport.opened.load(Ordering::SeqCst) >= 3);
    assert!(!connection.is_connected());
    assert_eq!(connected.len(), 0);
    connection.close().await;
}
