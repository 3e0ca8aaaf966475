//! In-memory broker for tests.
//!
//! [`MemoryBroker`] simulates a cluster of broker hosts inside the process. Tests
//! script outages, resource alarms, cancel-notifications and deliveries, and then
//! observe connection attempts, live consumers and acknowledgements.
//!
//! Deliveries and cancellations are pushed into [`DeliverySink`]s on the calling
//! thread, which plays the role of the transport's I/O thread.
//!
//! ```rust
//! use warren_transport_traits::memory::MemoryBroker;
//! use warren_transport_traits::{ConnectionParams, Host, Transport, TransportConnection};
//!
//! # tokio_test::block_on(async {
//! let broker = MemoryBroker::new();
//! let host = Host::new("rabbit-1", 5672);
//! broker.add_host(host.clone());
//!
//! let connection = broker
//!     .transport()
//!     .open(&host, &ConnectionParams::default())
//!     .await
//!     .unwrap();
//! assert!(connection.is_open());
//!
//! broker.drop_connections(&host, "node restart");
//! assert!(!connection.is_open());
//! # });
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::config::{ConnectionParams, ConsumeOptions};
use crate::error::{TransportError, TransportResult};
use crate::host::Host;
use crate::message::{Delivery, MessageProperties, ReceivedInfo};
use crate::signals::{CancelReason, ConnectionSignal};
use crate::traits::{DeliverySink, Transport, TransportChannel, TransportConnection};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// `basic.ack`
    Ack,
    /// `basic.nack`
    Nack {
        /// Whether the broker was asked to requeue.
        requeue: bool,
    },
}

/// One acknowledgement observed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    /// Channel the acknowledgement was written on.
    pub channel_id: u64,
    /// Delivery tag being settled.
    pub delivery_tag: u64,
    /// Ack or nack.
    pub settlement: Settlement,
}

struct ConsumerEntry {
    queue: String,
    consumer_tag: String,
    channel: Weak<MemoryChannel>,
    sink: Arc<dyn DeliverySink>,
}

#[derive(Default)]
struct BrokerState {
    reachable: HashMap<Host, bool>,
    open_attempts: Vec<Host>,
    connections: Vec<Arc<MemoryConnection>>,
    consumers: Vec<ConsumerEntry>,
    acks: Vec<AckRecord>,
    failing_consumes: HashMap<String, usize>,
    round_robin: HashMap<String, usize>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
}

impl BrokerInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A scriptable, in-process broker cluster.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryBroker")
            .field("hosts", &state.reachable.len())
            .field("connections", &state.connections.len())
            .field("consumers", &state.consumers.len())
            .finish()
    }
}

impl MemoryBroker {
    /// Creates a broker with no hosts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reachable host.
    pub fn add_host(&self, host: Host) {
        self.inner.state.lock().reachable.insert(host, true);
    }

    /// Makes a host accept or refuse new connections. Existing connections are unaffected.
    pub fn set_reachable(&self, host: &Host, reachable: bool) {
        self.inner
            .state
            .lock()
            .reachable
            .insert(host.clone(), reachable);
    }

    /// Returns a [`Transport`] that dials this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// Every host an `open` was attempted against, in order.
    pub fn open_attempts(&self) -> Vec<Host> {
        self.inner.state.lock().open_attempts.clone()
    }

    /// Hosts with a currently open connection.
    pub fn open_connections(&self) -> Vec<Host> {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.host.clone())
            .collect()
    }

    /// Number of live consumers on `queue`.
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner
            .state
            .lock()
            .consumers
            .iter()
            .filter(|c| c.queue == queue)
            .count()
    }

    /// Consumer tags of live consumers on `queue`.
    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .consumers
            .iter()
            .filter(|c| c.queue == queue)
            .map(|c| c.consumer_tag.clone())
            .collect()
    }

    /// All acknowledgements received so far.
    pub fn acks(&self) -> Vec<AckRecord> {
        self.inner.state.lock().acks.clone()
    }

    /// Makes the next `count` consume requests on `queue` fail.
    pub fn fail_next_consumes(&self, queue: &str, count: usize) {
        self.inner
            .state
            .lock()
            .failing_consumes
            .insert(queue.to_string(), count);
    }

    /// Drops every open connection to `host` and raises `Shutdown` on each.
    ///
    /// Consumers on those connections vanish without a cancel-notification.
    pub fn drop_connections(&self, host: &Host, reason: &str) {
        let dropped: Vec<Arc<MemoryConnection>> = {
            let mut state = self.inner.state.lock();
            let (dropped, kept): (Vec<_>, Vec<_>) = state
                .connections
                .drain(..)
                .partition(|c| &c.host == host && c.is_open());
            state.connections = kept;
            let dead: HashSet<u64> = dropped
                .iter()
                .flat_map(|c| c.channel_ids())
                .collect();
            state.consumers.retain(|entry| {
                entry
                    .channel
                    .upgrade()
                    .is_some_and(|ch| !dead.contains(&ch.id))
            });
            dropped
        };
        for connection in dropped {
            debug!(host = %host, reason, "memory broker dropping connection");
            connection.shut_down();
            let _ = connection.signals.send(ConnectionSignal::Shutdown {
                reason: reason.to_string(),
            });
        }
    }

    /// Raises `Blocked` on every open connection to `host`.
    pub fn block(&self, host: &Host, reason: &str) {
        for connection in self.connections_to(host) {
            let _ = connection.signals.send(ConnectionSignal::Blocked {
                reason: reason.to_string(),
            });
        }
    }

    /// Raises `Unblocked` on every open connection to `host`.
    pub fn unblock(&self, host: &Host) {
        for connection in self.connections_to(host) {
            let _ = connection.signals.send(ConnectionSignal::Unblocked);
        }
    }

    /// Sends a broker cancel-notification to every consumer on `queue`.
    pub fn cancel_consumers(&self, queue: &str) -> usize {
        let cancelled = self.remove_consumers(|entry| entry.queue == queue);
        let count = cancelled.len();
        for entry in cancelled {
            entry.sink.on_cancelled(CancelReason::BrokerCancelled);
        }
        count
    }

    /// Closes the channel carrying consumer `consumer_tag` with a channel error.
    pub fn fail_channel(&self, consumer_tag: &str, reason: &str) {
        let cancelled = self.remove_consumers(|entry| entry.consumer_tag == consumer_tag);
        for entry in cancelled {
            if let Some(channel) = entry.channel.upgrade() {
                channel.open.store(false, Ordering::SeqCst);
            }
            entry
                .sink
                .on_cancelled(CancelReason::ChannelError(reason.to_string()));
        }
    }

    /// Delivers `body` to one consumer on `queue`, round-robin.
    ///
    /// Returns the delivery tag, or `None` if the queue has no consumer.
    pub fn publish(&self, queue: &str, body: impl Into<Bytes>) -> Option<u64> {
        self.publish_with(queue, body, MessageProperties::default())
    }

    /// Like [`publish`](Self::publish) with explicit properties.
    pub fn publish_with(
        &self,
        queue: &str,
        body: impl Into<Bytes>,
        properties: MessageProperties,
    ) -> Option<u64> {
        let (sink, info) = {
            let mut state = self.inner.state.lock();
            let candidates: Vec<usize> = state
                .consumers
                .iter()
                .enumerate()
                .filter(|(_, c)| c.queue == queue)
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                return None;
            }
            let cursor = state.round_robin.entry(queue.to_string()).or_insert(0);
            let index = candidates[*cursor % candidates.len()];
            *cursor += 1;
            let entry = &state.consumers[index];
            let channel = entry.channel.upgrade()?;
            let info = ReceivedInfo {
                consumer_tag: entry.consumer_tag.clone(),
                delivery_tag: channel.next_delivery_tag.fetch_add(1, Ordering::Relaxed) + 1,
                redelivered: false,
                exchange: String::new(),
                routing_key: queue.to_string(),
                queue: queue.to_string(),
            };
            (entry.sink.clone(), info)
        };
        let delivery_tag = info.delivery_tag;
        trace!(queue, delivery_tag, "memory broker delivering");
        sink.on_delivery(Delivery {
            body: body.into(),
            properties,
            info,
        });
        Some(delivery_tag)
    }

    fn connections_to(&self, host: &Host) -> Vec<Arc<MemoryConnection>> {
        self.inner
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| &c.host == host && c.is_open())
            .cloned()
            .collect()
    }

    fn remove_consumers(&self, predicate: impl Fn(&ConsumerEntry) -> bool) -> Vec<ConsumerEntry> {
        let mut state = self.inner.state.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = state.consumers.drain(..).partition(predicate);
        state.consumers = kept;
        removed
    }
}

/// [`Transport`] handle for a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        host: &Host,
        _params: &ConnectionParams,
    ) -> TransportResult<Arc<dyn TransportConnection>> {
        let inner = &self.broker.inner;
        let mut state = inner.state.lock();
        state.open_attempts.push(host.clone());
        if !state.reachable.get(host).copied().unwrap_or(false) {
            return Err(TransportError::ConnectionFailed(format!(
                "{host}: connection refused"
            )));
        }
        let (signals, _) = broadcast::channel(16);
        let connection = Arc::new(MemoryConnection {
            id: inner.next_id(),
            host: host.clone(),
            open: AtomicBool::new(true),
            signals,
            broker: Arc::downgrade(inner),
            channels: Mutex::new(Vec::new()),
        });
        state.connections.push(connection.clone());
        Ok(connection)
    }
}

/// A connection to a [`MemoryBroker`] host.
pub struct MemoryConnection {
    id: u64,
    host: Host,
    open: AtomicBool,
    signals: broadcast::Sender<ConnectionSignal>,
    broker: Weak<BrokerInner>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MemoryConnection {
    fn channel_ids(&self) -> Vec<u64> {
        self.channels.lock().iter().map(|c| c.id).collect()
    }

    fn shut_down(&self) {
        self.open.store(false, Ordering::SeqCst);
        for channel in self.channels.lock().drain(..) {
            channel.open.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signals.subscribe()
    }

    async fn create_channel(&self) -> TransportResult<Arc<dyn TransportChannel>> {
        if !self.is_open() {
            return Err(TransportError::ConnectionLost(format!(
                "{}: connection closed",
                self.host
            )));
        }
        let broker = self
            .broker
            .upgrade()
            .ok_or_else(|| TransportError::NotAvailable("broker dropped".to_string()))?;
        let channel = Arc::new_cyclic(|me| MemoryChannel {
            id: broker.next_id(),
            me: me.clone(),
            open: AtomicBool::new(true),
            next_delivery_tag: AtomicU64::new(0),
            broker: self.broker.clone(),
        });
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(broker) = self.broker.upgrade() {
            let ids = self.channel_ids();
            broker.state.lock().consumers.retain(|entry| {
                entry
                    .channel
                    .upgrade()
                    .is_some_and(|ch| !ids.contains(&ch.id))
            });
        }
        self.shut_down();
        Ok(())
    }

    fn endpoint(&self) -> &Host {
        &self.host
    }
}

/// A channel on a [`MemoryConnection`].
pub struct MemoryChannel {
    id: u64,
    me: Weak<MemoryChannel>,
    open: AtomicBool,
    next_delivery_tag: AtomicU64,
    broker: Weak<BrokerInner>,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MemoryChannel {
    fn broker(&self) -> TransportResult<Arc<BrokerInner>> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(format!(
                "channel {} is closed",
                self.id
            )));
        }
        self.broker
            .upgrade()
            .ok_or_else(|| TransportError::NotAvailable("broker dropped".to_string()))
    }

    fn settle(&self, delivery_tag: u64, settlement: Settlement) -> TransportResult<()> {
        let broker = self.broker().map_err(|e| TransportError::AcknowledgeFailed {
            delivery_tag,
            reason: e.to_string(),
        })?;
        broker.state.lock().acks.push(AckRecord {
            channel_id: self.id,
            delivery_tag,
            settlement,
        });
        Ok(())
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        sink: Arc<dyn DeliverySink>,
    ) -> TransportResult<String> {
        let broker = self.broker()?;
        let mut state = broker.state.lock();
        if let Some(remaining) = state.failing_consumes.get_mut(queue)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::ConsumeFailed {
                queue: queue.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        let consumer_tag = if options.consumer_tag.is_empty() {
            format!("amq.ctag-{}", broker.next_id())
        } else {
            options.consumer_tag
        };
        state.consumers.push(ConsumerEntry {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.clone(),
            channel: self.me.clone(),
            sink,
        });
        Ok(consumer_tag)
    }

    async fn cancel(&self, consumer_tag: &str) -> TransportResult<()> {
        let broker = self.broker()?;
        broker
            .state
            .lock()
            .consumers
            .retain(|entry| entry.consumer_tag != consumer_tag);
        Ok(())
    }

    fn ack(&self, delivery_tag: u64) -> TransportResult<()> {
        self.settle(delivery_tag, Settlement::Ack)
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> TransportResult<()> {
        self.settle(delivery_tag, Settlement::Nack { requeue })
    }

    async fn close(&self) -> TransportResult<()> {
        if let Some(broker) = self.broker.upgrade() {
            broker.state.lock().consumers.retain(|entry| {
                entry.channel.upgrade().is_some_and(|ch| ch.id != self.id)
            });
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
