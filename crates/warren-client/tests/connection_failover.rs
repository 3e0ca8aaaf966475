//! Failover behavior of `PersistentConnection` against the in-memory broker.

mod common;

use std::sync::Arc;

use common::{Recorder, config_for, eventually, init_tracing};
use pretty_assertions::assert_eq;
use warren_client::events::{
    ConnectionBlocked, ConnectionConnected, ConnectionDisconnected, ConnectionUnblocked,
};
use warren_client::{
    ConnectionConfig, ConnectionState, Error, EventBus, Host, HostSelection, PersistentConnection,
    Session,
};
use warren_transport_traits::memory::MemoryBroker;

struct Cluster {
    broker: MemoryBroker,
    a: Host,
    b: Host,
    c: Host,
}

impl Cluster {
    fn new() -> Self {
        let broker = MemoryBroker::new();
        let a = Host::new("rabbit-a", 5672);
        let b = Host::new("rabbit-b", 5672);
        let c = Host::new("rabbit-c", 5672);
        for host in [&a, &b, &c] {
            broker.add_host(host.clone());
        }
        Self { broker, a, b, c }
    }

    fn connection(&self, bus: &EventBus) -> PersistentConnection {
        PersistentConnection::new(
            &config_for(&[&self.a, &self.b, &self.c]),
            Arc::new(self.broker.transport()),
            bus.clone(),
        )
        .unwrap()
    }
}

#[tokio::test]
async fn test_fails_over_to_first_reachable_host() {
    init_tracing();
    let cluster = Cluster::new();
    cluster.broker.set_reachable(&cluster.a, false);
    cluster.broker.set_reachable(&cluster.b, false);

    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let connection = cluster.connection(&bus);
    connection.start().unwrap();

    eventually("connected", || connected.len() == 1).await;
    assert_eq!(
        connected.events(),
        vec![ConnectionConnected {
            host: cluster.c.clone()
        }]
    );
    assert_eq!(
        cluster.broker.open_attempts(),
        vec![cluster.a.clone(), cluster.b.clone(), cluster.c.clone()]
    );
    assert_eq!(connection.current_host(), Some(cluster.c.clone()));

    let stats = connection.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.connects, 1);
    connection.close().await;
}

#[tokio::test]
async fn test_reconnect_after_drop_starts_past_last_good_host() {
    init_tracing();
    let cluster = Cluster::new();
    cluster.broker.set_reachable(&cluster.a, false);
    cluster.broker.set_reachable(&cluster.b, false);

    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let disconnected = Recorder::<ConnectionDisconnected>::new(&bus);
    let connection = cluster.connection(&bus);
    connection.start().unwrap();
    eventually("first connect", || connected.len() == 1).await;

    cluster.broker.set_reachable(&cluster.a, true);
    let attempts_before = cluster.broker.open_attempts().len();
    cluster.broker.drop_connections(&cluster.c, "node shutdown");

    eventually("reconnect", || connected.len() == 2).await;
    assert_eq!(
        disconnected.events(),
        vec![ConnectionDisconnected {
            host: cluster.c.clone(),
            reason: "node shutdown".to_string(),
        }]
    );
    assert_eq!(cluster.broker.open_attempts()[attempts_before], cluster.a);
    assert_eq!(connected.events()[1].host, cluster.a);
    assert_eq!(connection.stats().disconnects, 1);
    connection.close().await;
}

#[tokio::test]
async fn test_retries_indefinitely_until_a_host_recovers() {
    init_tracing();
    let cluster = Cluster::new();
    for host in [&cluster.a, &cluster.b, &cluster.c] {
        cluster.broker.set_reachable(host, false);
    }

    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let connection = cluster.connection(&bus);
    connection.start().unwrap();

    // several full cycles fail without surfacing anything
    eventually("three failed cycles", || cluster.broker.open_attempts().len() >= 9).await;
    assert!(!connection.is_connected());
    assert_eq!(connected.len(), 0);

    cluster.broker.set_reachable(&cluster.b, true);
    eventually("recovery", || connected.len() == 1).await;
    assert_eq!(connected.events()[0].host, cluster.b);
    connection.close().await;
}

#[tokio::test]
async fn test_blocked_and_unblocked_are_forwarded() {
    init_tracing();
    let cluster = Cluster::new();
    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let blocked = Recorder::<ConnectionBlocked>::new(&bus);
    let unblocked = Recorder::<ConnectionUnblocked>::new(&bus);
    let disconnected = Recorder::<ConnectionDisconnected>::new(&bus);
    let connection = cluster.connection(&bus);
    connection.start().unwrap();
    eventually("connected", || connected.len() == 1).await;

    cluster.broker.block(&cluster.a, "memory alarm");
    eventually("blocked", || blocked.len() == 1).await;
    assert_eq!(connection.state(), ConnectionState::Blocked);
    assert_eq!(blocked.events()[0].reason, "memory alarm");

    cluster.broker.unblock(&cluster.a);
    eventually("unblocked", || unblocked.len() == 1).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(disconnected.len(), 0);
    connection.close().await;
}

#[tokio::test]
async fn test_close_publishes_nothing_further() {
    let cluster = Cluster::new();
    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let disconnected = Recorder::<ConnectionDisconnected>::new(&bus);
    let connection = cluster.connection(&bus);
    connection.start().unwrap();
    eventually("connected", || connected.len() == 1).await;

    connection.close().await;
    assert!(cluster.broker.open_connections().is_empty());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(disconnected.len(), 0);
    assert_eq!(connected.len(), 1);
}

#[tokio::test]
async fn test_random_selection_connects_to_some_host() {
    let cluster = Cluster::new();
    cluster.broker.set_reachable(&cluster.a, false);
    let config = config_for(&[&cluster.a, &cluster.b, &cluster.c])
        .with_host_selection(HostSelection::Random);
    let bus = EventBus::new();
    let connected = Recorder::<ConnectionConnected>::new(&bus);
    let connection =
        PersistentConnection::new(&config, Arc::new(cluster.broker.transport()), bus.clone())
            .unwrap();
    connection.start().unwrap();

    eventually("connected", || connected.len() == 1).await;
    assert_ne!(connected.events()[0].host, cluster.a);
    assert!(cluster.broker.open_attempts().len() <= 3);
    connection.close().await;
}

#[tokio::test]
async fn test_session_rejects_empty_host_list() {
    let broker = MemoryBroker::new();
    let err = Session::connect(ConnectionConfig::new(), Arc::new(broker.transport())).unwrap_err();
    assert_eq!(err, Error::NoCandidates);
}

#[tokio::test]
async fn test_session_channel_needs_connection() {
    let broker = MemoryBroker::new();
    let host = Host::new("offline", 5672);
    let session = Session::connect(config_for(&[&host]), Arc::new(broker.transport())).unwrap();
    assert!(matches!(
        session.create_channel().await,
        Err(Error::TransportUnavailable(_))
    ));

    broker.add_host(host.clone());
    tokio::time::timeout(common::PATIENCE, session.wait_connected())
        .await
        .unwrap()
        .unwrap();
    assert!(session.create_channel().await.is_ok());
    session.close().await;
}
