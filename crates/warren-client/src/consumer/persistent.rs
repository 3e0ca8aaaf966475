//! Self-healing logical consumers.
//!
//! A [`PersistentConsumer`] owns zero or one [`InternalConsumer`] at a time and
//! follows the connection lifecycle:
//!
//! ```text
//!            Connected / cancel               start ok
//!   Idle ──────────────────────► Starting ─────────────► Active
//!    ▲                              │                      │
//!    │        start failed          │       cancelled      │
//!    ├──────────────────────────────┘◄─────────────────────┤
//!    │                      Disconnected                   │
//!    └─────────────────────────────────────────────────────┘
//!
//!   any state ── dispose() ──► Disposed (terminal)
//! ```
//!
//! While the connection is up a live consumer has exactly one internal
//! consumer; while it is down it has none. Transport faults never reach the
//! application: they are logged and published as events.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::event_bus::Subscription;
use crate::events::{ConnectionConnected, ConnectionDisconnected};

use super::handler::MessageHandler;
use super::internal::{ConsumerId, InternalConsumer, InternalConsumerFactory};

/// Lifecycle of a [`PersistentConsumer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    /// No internal consumer and no start in flight.
    Idle,
    /// An internal consumer is being created.
    Starting,
    /// One internal consumer is live.
    Active,
    /// Terminal.
    Disposed,
}

struct ConsumerState {
    status: ConsumerStatus,
    /// Bumped on every disconnect; starts begun before it are stale.
    generation: u64,
    active: HashMap<ConsumerId, Arc<InternalConsumer>>,
}

struct ConsumerInner {
    queue: String,
    config: ConsumerConfig,
    handler: Arc<dyn MessageHandler>,
    factory: Arc<InternalConsumerFactory>,
    runtime: Handle,
    state: Mutex<ConsumerState>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// A consumer that survives reconnects and broker cancellations.
///
/// Dropping it disposes it.
pub struct PersistentConsumer {
    inner: Arc<ConsumerInner>,
}

impl fmt::Debug for PersistentConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentConsumer")
            .field("queue", &self.inner.queue)
            .field("status", &self.status())
            .finish()
    }
}

impl PersistentConsumer {
    /// Creates an idle consumer for `queue`. Call
    /// [`start_consuming`](Self::start_consuming) to bind it to the connection.
    ///
    /// Teardown work is spawned on `runtime`.
    pub fn new(
        queue: impl Into<String>,
        config: ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
        factory: Arc<InternalConsumerFactory>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                queue: queue.into(),
                config,
                handler,
                factory,
                runtime,
                state: Mutex::new(ConsumerState {
                    status: ConsumerStatus::Idle,
                    generation: 0,
                    active: HashMap::new(),
                }),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Follows the connection lifecycle and starts an internal consumer right
    /// away if the connection is up. Idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn start_consuming(&self) -> Result<()> {
        if self.status() == ConsumerStatus::Disposed {
            return Err(Error::Disposed("persistent consumer"));
        }
        {
            let mut subscriptions = self.inner.subscriptions.lock();
            if subscriptions.is_empty() {
                let bus = self.inner.factory.bus();
                let weak = Arc::downgrade(&self.inner);
                subscriptions.push(bus.subscribe(move |_: &ConnectionConnected| {
                    if let Some(inner) = weak.upgrade() {
                        inner.try_start();
                    }
                }));
                let weak = Arc::downgrade(&self.inner);
                subscriptions.push(bus.subscribe(move |event: &ConnectionDisconnected| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_disconnected(&event.reason);
                    }
                }));
                debug!(queue = %self.inner.queue, "persistent consumer bound to connection");
            }
        }
        self.inner.try_start();
        Ok(())
    }

    /// Queue being consumed.
    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ConsumerStatus {
        self.inner.state.lock().status
    }

    /// Number of live internal consumers: 1 while connected, 0 otherwise.
    pub fn active_consumers(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Consumer tags of the live internal consumers.
    pub fn consumer_tags(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .active
            .values()
            .map(|c| c.consumer_tag().to_string())
            .collect()
    }

    /// Stops following the connection and tears down the live internal
    /// consumer. Terminal and idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for PersistentConsumer {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl ConsumerInner {
    /// Starts an internal consumer if none is live or starting and the
    /// connection is up. Otherwise a no-op; the next `Connected` retries.
    fn try_start(self: &Arc<Self>) {
        let generation = {
            let mut state = self.state.lock();
            if state.status != ConsumerStatus::Idle || !state.active.is_empty() {
                return;
            }
            if !self.factory.is_connected() {
                return;
            }
            state.status = ConsumerStatus::Starting;
            state.generation
        };
        let inner = Arc::clone(self);
        self.runtime
            .spawn(async move { inner.start_internal(generation).await });
    }

    async fn start_internal(self: Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(&self);
        let on_cancel = Box::new(move |id: ConsumerId| {
            if let Some(inner) = weak.upgrade() {
                inner.on_cancelled(id);
            }
        });
        let created = self
            .factory
            .create(&self.queue, &self.config, Arc::clone(&self.handler), on_cancel)
            .await;

        match created {
            Ok(consumer) => self.install(consumer, generation).await,
            Err(_) => {
                let retry = {
                    let mut state = self.state.lock();
                    let current = state.generation == generation
                        && state.status == ConsumerStatus::Starting;
                    if current {
                        state.status = ConsumerStatus::Idle;
                    }
                    current
                };
                if retry {
                    self.schedule_retry(generation);
                }
            }
        }
    }

    async fn install(self: &Arc<Self>, consumer: Arc<InternalConsumer>, generation: u64) {
        enum Outcome {
            Installed,
            Stale,
            CancelledEarly,
        }
        let outcome = {
            let mut state = self.state.lock();
            if state.status == ConsumerStatus::Disposed || state.generation != generation {
                Outcome::Stale
            } else if consumer.is_cancelled() {
                // cancel-notification arrived before registration
                state.status = ConsumerStatus::Idle;
                Outcome::CancelledEarly
            } else {
                state.active.insert(consumer.id(), Arc::clone(&consumer));
                state.status = ConsumerStatus::Active;
                Outcome::Installed
            }
        };

        match outcome {
            Outcome::Installed => {
                debug!(queue = %self.queue, consumer = %consumer.id(), "internal consumer active");
            }
            Outcome::Stale => {
                debug!(queue = %self.queue, consumer = %consumer.id(), "discarding stale internal consumer");
                consumer.dispose().await;
            }
            Outcome::CancelledEarly => {
                consumer.dispose().await;
                self.try_start();
            }
        }
    }

    /// Retries a failed start after the factory's retry interval, unless the
    /// connection has cycled or the consumer was disposed meanwhile.
    fn schedule_retry(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.factory.retry_interval();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.state.lock().generation == generation {
                inner.try_start();
            }
        });
    }

    fn on_cancelled(self: &Arc<Self>, id: ConsumerId) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.active.remove(&id);
            if removed.is_some() && state.status == ConsumerStatus::Active && state.active.is_empty() {
                state.status = ConsumerStatus::Idle;
            }
            removed
        };
        // unknown ids belong to a previous generation or have not been installed yet
        let Some(consumer) = removed else {
            return;
        };
        info!(queue = %self.queue, consumer = %id, "replacing cancelled consumer");
        self.runtime.spawn(async move { consumer.dispose().await });
        self.try_start();
    }

    fn on_disconnected(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.status == ConsumerStatus::Disposed {
            return;
        }
        let dropped = state.active.len();
        // the transport already invalidated these; no close calls
        state.active.clear();
        state.generation += 1;
        state.status = ConsumerStatus::Idle;
        debug!(queue = %self.queue, dropped, reason, "connection lost, internal consumers cleared");
    }

    fn dispose(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        drop(subscriptions);

        let consumers: Vec<Arc<InternalConsumer>> = {
            let mut state = self.state.lock();
            if state.status == ConsumerStatus::Disposed {
                return;
            }
            state.status = ConsumerStatus::Disposed;
            state.active.drain().map(|(_, consumer)| consumer).collect()
        };
        for consumer in consumers {
            consumer.mark_disposed();
            self.runtime.spawn(async move { consumer.dispose().await });
        }
        info!(queue = %self.queue, "persistent consumer disposed");
    }
}
