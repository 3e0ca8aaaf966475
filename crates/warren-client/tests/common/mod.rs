//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use warren_client::{ConnectionConfig, Event, EventBus, Host, Subscription};

/// Upper bound for anything the tests wait on.
pub const PATIENCE: Duration = Duration::from_secs(5);

/// Installs a fmt subscriber once so `RUST_LOG=debug` shows session logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, panicking after [`PATIENCE`].
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + PATIENCE;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A fast-retrying configuration for `hosts`.
pub fn config_for(hosts: &[&Host]) -> ConnectionConfig {
    hosts
        .iter()
        .fold(ConnectionConfig::new(), |config, host| {
            config.with_host(host.address(), host.port())
        })
        .with_timeout(Duration::from_secs(1))
        .with_connect_interval(Duration::from_millis(20))
}

/// Records every `E` published on a bus.
pub struct Recorder<E> {
    events: Arc<Mutex<Vec<E>>>,
    _subscription: Subscription,
}

impl<E: Event + Clone> Recorder<E> {
    pub fn new(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = bus.subscribe(move |event: &E| sink.lock().push(event.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}
