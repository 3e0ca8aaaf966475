//! Ordered execution of consumer callbacks
//!
//! Transports hand deliveries to consumers on their I/O context, which must
//! return immediately to keep reading. The [`ConsumerDispatcher`] moves the
//! user callback off that context onto one dedicated worker thread:
//!
//! ```text
//!  I/O context ──queue_action──►┌──────────────┐
//!  I/O context ──queue_action──►│ FIFO (unbnd) │──► worker thread ──► action()
//!  I/O context ──queue_action──►└──────────────┘
//! ```
//!
//! Every action runs on the same thread, strictly in submission order. A
//! panicking action is reported and the worker moves on to the next one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::event_bus::{EventBus, Subscription};
use crate::events::ConnectionDisconnected;
use crate::metrics::{AtomicDispatcherStats, DispatcherStats};

/// A unit of work queued on the dispatcher.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    /// `None` once disposed.
    sender: Mutex<Option<Sender<Action>>>,
    /// Second handle on the queue, used to discard pending actions.
    receiver: Receiver<Action>,
    stats: AtomicDispatcherStats,
}

impl Shared {
    fn discard_pending(&self) -> u64 {
        let mut dropped = 0;
        for action in self.receiver.try_iter() {
            drop(action);
            dropped += 1;
        }
        if dropped > 0 {
            self.stats.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
        dropped
    }
}

/// Single-worker FIFO executor for consumer callbacks.
///
/// One dispatcher is shared by every consumer of a session. It is created by
/// the composition root and handed to the consumer factory explicitly.
pub struct ConsumerDispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    drain_on_disconnect: Mutex<Option<Subscription>>,
}

impl std::fmt::Debug for ConsumerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatcher")
            .field("worker", &self.worker_id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConsumerDispatcher {
    /// Starts a dispatcher whose worker thread is called `thread_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Worker`] if the OS refuses to spawn the thread.
    pub fn new(thread_name: impl Into<String>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Action>();
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            receiver: receiver.clone(),
            stats: AtomicDispatcherStats::default(),
        });

        let thread_name = thread_name.into();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(&worker_shared, &receiver))
            .map_err(|e| Error::Worker(format!("{thread_name}: {e}")))?;
        let worker_id = worker.thread().id();
        info!(thread = %thread_name, "consumer dispatcher started");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            worker_id,
            drain_on_disconnect: Mutex::new(None),
        })
    }

    /// Starts a dispatcher that discards its pending actions whenever `bus`
    /// reports [`ConnectionDisconnected`].
    ///
    /// Deliveries queued before a disconnect belong to channels that no longer
    /// exist, so they could not be acknowledged anyway; the broker redelivers
    /// them to the next consumer.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_event_bus(thread_name: impl Into<String>, bus: &EventBus) -> Result<Self> {
        let dispatcher = Self::new(thread_name)?;
        let shared = Arc::downgrade(&dispatcher.shared);
        let subscription = bus.subscribe(move |event: &ConnectionDisconnected| {
            if let Some(shared) = shared.upgrade() {
                let dropped = shared.discard_pending();
                if dropped > 0 {
                    debug!(host = %event.host, dropped, "discarded pending consumer actions");
                }
            }
        });
        *dispatcher.drain_on_disconnect.lock() = Some(subscription);
        Ok(dispatcher)
    }

    /// Queues `action` behind everything queued so far. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] once [`dispose`](Self::dispose) has been called.
    pub fn queue_action<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.shared.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(Error::Disposed("consumer dispatcher"));
        };
        sender
            .send(Box::new(action))
            .map_err(|_| Error::Disposed("consumer dispatcher"))?;
        self.shared.stats.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Discards every queued action that has not started yet and returns how many.
    pub fn clear_pending(&self) -> u64 {
        self.shared.discard_pending()
    }

    /// Whether the calling thread is the dispatcher's worker.
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Counter snapshot.
    pub fn stats(&self) -> DispatcherStats {
        self.shared.stats.snapshot()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.sender.lock().is_none()
    }

    /// Stops accepting actions and shuts the worker down.
    ///
    /// The action currently running, if any, finishes; actions still queued are
    /// discarded. Waits for the worker to exit unless called from the worker
    /// itself. Idempotent.
    pub fn dispose(&self) {
        let Some(sender) = self.shared.sender.lock().take() else {
            return;
        };
        self.drain_on_disconnect.lock().take();
        let dropped = self.shared.discard_pending();
        drop(sender);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if self.is_worker_thread() {
                debug!("consumer dispatcher disposed from its own worker");
            } else if worker.join().is_err() {
                error!("consumer dispatcher worker terminated abnormally");
            }
        }
        info!(dropped, "consumer dispatcher stopped");
    }
}

impl Drop for ConsumerDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn run_worker(shared: &Shared, receiver: &Receiver<Action>) {
    // recv fails once every sender is gone and the queue is empty
    while let Ok(action) = receiver.recv() {
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(()) => {
                shared.stats.executed.fetch_add(1, Ordering::Relaxed);
                trace!("consumer action executed");
            }
            Err(payload) => {
                shared.stats.faulted.fetch_add(1, Ordering::Relaxed);
                let err = Error::from_panic(payload.as_ref());
                error!(error = %err, "consumer action panicked");
            }
        }
    }
}
