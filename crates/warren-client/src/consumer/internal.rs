//! Protocol-level consumers.
//!
//! An [`InternalConsumer`] is one live `consume` on one channel of the current
//! transport connection. It never outlives that connection: persistent
//! consumers replace it after a cancel-notification or a reconnect.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};
use warren_transport_traits::{CancelReason, Delivery, DeliverySink, TransportChannel};

use crate::config::ConsumerConfig;
use crate::connection::PersistentConnection;
use crate::dispatcher::ConsumerDispatcher;
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::events::{
    ConsumerCancelled, MessageAcknowledged, StartConsumingFailed, StartConsumingSucceeded,
};

use super::handler::{AckStrategy, MessageHandler};

/// Opaque identity of an [`InternalConsumer`], unique per factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Called when the broker or the channel ends an internal consumer.
pub(crate) type CancelCallback = Box<dyn Fn(ConsumerId) + Send + Sync>;

/// Receives deliveries on the transport's I/O context and hands them to the
/// dispatcher.
struct ConsumerSink {
    id: ConsumerId,
    queue: String,
    consumer_tag: OnceLock<String>,
    channel: Weak<dyn TransportChannel>,
    handler: Arc<dyn MessageHandler>,
    dispatcher: Arc<ConsumerDispatcher>,
    bus: EventBus,
    on_cancel: CancelCallback,
    cancelled: AtomicBool,
    disposed: Arc<AtomicBool>,
}

impl DeliverySink for ConsumerSink {
    fn on_delivery(&self, delivery: Delivery) {
        let delivery_tag = delivery.info.delivery_tag;
        trace!(queue = %self.queue, delivery_tag, "delivery received");

        let queue = self.queue.clone();
        let channel = self.channel.clone();
        let handler = Arc::clone(&self.handler);
        let bus = self.bus.clone();
        let disposed = Arc::clone(&self.disposed);
        let queued = self.dispatcher.queue_action(move || {
            if disposed.load(Ordering::Acquire) {
                // the channel is going away; the broker will redeliver
                trace!(queue = %queue, delivery_tag, "skipping delivery for disposed consumer");
                return;
            }
            let outcome = run_handler(handler.as_ref(), &delivery, &queue);
            settle(&channel, &queue, delivery_tag, outcome);
            bus.publish(MessageAcknowledged {
                queue,
                delivery_tag,
                outcome,
            });
        });
        if let Err(e) = queued {
            warn!(queue = %self.queue, delivery_tag, error = %e, "dropping delivery");
        }
    }

    fn on_cancelled(&self, reason: CancelReason) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(queue = %self.queue, consumer = %self.id, reason = %reason, "consumer cancelled");
        self.bus.publish(ConsumerCancelled {
            queue: self.queue.clone(),
            consumer_tag: self.consumer_tag.get().cloned().unwrap_or_default(),
            reason: reason.to_string(),
        });
        (self.on_cancel)(self.id);
    }
}

fn run_handler(handler: &dyn MessageHandler, delivery: &Delivery, queue: &str) -> AckStrategy {
    let result = catch_unwind(AssertUnwindSafe(|| {
        handler.handle(&delivery.body, &delivery.properties, &delivery.info)
    }));
    let fault = match result {
        Ok(Ok(strategy)) => return strategy,
        Ok(Err(e)) => Error::HandlerFault(e.to_string()),
        Err(payload) => Error::from_panic(payload.as_ref()),
    };
    error!(
        queue,
        delivery_tag = delivery.info.delivery_tag,
        error = %fault,
        "message handler failed, rejecting delivery"
    );
    AckStrategy::NackWithoutRequeue
}

fn settle(channel: &Weak<dyn TransportChannel>, queue: &str, delivery_tag: u64, outcome: AckStrategy) {
    let Some(channel) = channel.upgrade() else {
        debug!(queue, delivery_tag, "channel gone before acknowledgement");
        return;
    };
    let result = match outcome {
        AckStrategy::Ack => channel.ack(delivery_tag),
        AckStrategy::NackWithRequeue => channel.nack(delivery_tag, true),
        AckStrategy::NackWithoutRequeue => channel.nack(delivery_tag, false),
    };
    if let Err(e) = result {
        // the broker redelivers unacknowledged messages once the channel is gone
        warn!(queue, delivery_tag, error = %e, "failed to settle delivery");
    }
}

/// One live subscription on one channel.
pub struct InternalConsumer {
    id: ConsumerId,
    queue: String,
    consumer_tag: String,
    channel: Arc<dyn TransportChannel>,
    sink: Arc<ConsumerSink>,
}

impl fmt::Debug for InternalConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalConsumer")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .finish()
    }
}

impl InternalConsumer {
    /// Identity within the owning factory.
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Broker-assigned or configured consumer tag.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the broker or the channel has ended this consumer.
    pub fn is_cancelled(&self) -> bool {
        self.sink.cancelled.load(Ordering::Acquire)
    }

    /// Stops running handlers for deliveries not yet started.
    pub(crate) fn mark_disposed(&self) {
        self.sink.disposed.store(true, Ordering::Release);
    }

    /// Cancels the subscription and closes its channel. Errors are logged only.
    pub async fn dispose(&self) {
        self.mark_disposed();
        if self.channel.is_open() {
            if let Err(e) = self.channel.cancel(&self.consumer_tag).await {
                debug!(consumer_tag = %self.consumer_tag, error = %e, "cancel failed");
            }
            if let Err(e) = self.channel.close().await {
                debug!(consumer_tag = %self.consumer_tag, error = %e, "channel close failed");
            }
        }
        debug!(queue = %self.queue, consumer_tag = %self.consumer_tag, "internal consumer disposed");
    }
}

/// Creates [`InternalConsumer`]s on the current connection.
///
/// Shared by every persistent consumer of a session.
pub struct InternalConsumerFactory {
    connection: Arc<PersistentConnection>,
    dispatcher: Arc<ConsumerDispatcher>,
    bus: EventBus,
    default_prefetch: u16,
    retry_interval: Duration,
    next_id: AtomicU64,
}

impl fmt::Debug for InternalConsumerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalConsumerFactory")
            .field("default_prefetch", &self.default_prefetch)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

impl InternalConsumerFactory {
    /// Creates a factory bound to `connection` and `dispatcher`.
    ///
    /// `retry_interval` is how long a persistent consumer waits before trying
    /// again after a failed start while the connection stays up.
    pub fn new(
        connection: Arc<PersistentConnection>,
        dispatcher: Arc<ConsumerDispatcher>,
        bus: EventBus,
        default_prefetch: u16,
        retry_interval: Duration,
    ) -> Self {
        Self {
            connection,
            dispatcher,
            bus,
            default_prefetch,
            retry_interval,
            next_id: AtomicU64::new(0),
        }
    }

    /// Whether the underlying connection is up.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The event bus consumers report to.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Opens a channel and starts consuming `queue` on it.
    ///
    /// Publishes [`StartConsumingSucceeded`] or [`StartConsumingFailed`].
    ///
    /// # Errors
    ///
    /// [`Error::ConsumerStartFailed`] when no channel could be opened or the
    /// broker refused the subscription.
    pub(crate) async fn create(
        &self,
        queue: &str,
        config: &ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
        on_cancel: CancelCallback,
    ) -> Result<Arc<InternalConsumer>> {
        let result = self.try_create(queue, config, handler, on_cancel).await;
        match &result {
            Ok(consumer) => {
                info!(queue, consumer_tag = %consumer.consumer_tag, "started consuming");
                self.bus.publish(StartConsumingSucceeded {
                    queue: queue.to_string(),
                    consumer_tag: consumer.consumer_tag.clone(),
                });
            }
            Err(e) => {
                warn!(queue, error = %e, "failed to start consuming");
                self.bus.publish(StartConsumingFailed {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    async fn try_create(
        &self,
        queue: &str,
        config: &ConsumerConfig,
        handler: Arc<dyn MessageHandler>,
        on_cancel: CancelCallback,
    ) -> Result<Arc<InternalConsumer>> {
        let start_failed = |reason: String| Error::ConsumerStartFailed {
            queue: queue.to_string(),
            reason,
        };
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| start_failed(e.to_string()))?;

        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let sink = Arc::new(ConsumerSink {
            id,
            queue: queue.to_string(),
            consumer_tag: OnceLock::new(),
            channel: Arc::downgrade(&channel),
            handler,
            dispatcher: Arc::clone(&self.dispatcher),
            bus: self.bus.clone(),
            on_cancel,
            cancelled: AtomicBool::new(false),
            disposed: Arc::new(AtomicBool::new(false)),
        });

        let options = config.consume_options(self.default_prefetch);
        let consumer_tag = match channel
            .consume(queue, options, Arc::clone(&sink) as Arc<dyn DeliverySink>)
            .await
        {
            Ok(tag) => {
                let _ = sink.consumer_tag.set(tag.clone());
                tag
            }
            Err(e) => {
                if let Err(close_err) = channel.close().await {
                    debug!(queue, error = %close_err, "failed to close channel after consume error");
                }
                return Err(start_failed(e.to_string()));
            }
        };

        Ok(Arc::new(InternalConsumer {
            id,
            queue: queue.to_string(),
            consumer_tag,
            channel,
            sink,
        }))
    }
}
