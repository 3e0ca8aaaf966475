//! Typed in-process publish/subscribe
//!
//! The [`EventBus`] decouples the connection lifecycle from everything that
//! reacts to it (consumers, the dispatcher, publishers, application code).
//!
//! - Handlers are keyed by the exact event type.
//! - [`publish`](EventBus::publish) runs against a snapshot of the handler list
//!   taken when the call starts; concurrent subscribe/unsubscribe only affect
//!   later publishes.
//! - A panicking handler is logged and skipped; the remaining handlers still run.
//! - [`subscribe`](EventBus::subscribe) returns a [`Subscription`]; dropping or
//!   disposing it removes exactly that handler.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::error::Error;

/// Marker for types that can travel over the [`EventBus`].
pub trait Event: Any + Send + Sync {}

impl<T: Any + Send + Sync> Event for T {}

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    handlers: Mutex<HashMap<TypeId, Arc<Vec<Registration>>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, type_id: TypeId, id: u64) {
        let mut handlers = self.handlers.lock();
        if let Some(list) = handlers.get_mut(&type_id) {
            // Copy-on-write: publishers holding the old Arc keep their snapshot.
            Arc::make_mut(list).retain(|r| r.id != id);
            if list.is_empty() {
                handlers.remove(&type_id);
            }
        }
    }
}

/// Process- or session-scoped typed event bus. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.registry.handlers.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every handler registered for `E`, in subscription order.
    pub fn publish<E: Event>(&self, event: E) {
        let snapshot = self
            .registry
            .handlers
            .lock()
            .get(&TypeId::of::<E>())
            .cloned();
        let Some(snapshot) = snapshot else {
            trace!(event = type_name::<E>(), "no subscribers");
            return;
        };

        for registration in snapshot.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.handler)(&event)));
            if let Err(payload) = outcome {
                let err = Error::from_panic(payload.as_ref());
                error!(
                    event = type_name::<E>(),
                    subscription = registration.id,
                    error = %err,
                    "event handler panicked"
                );
            }
        }
    }

    /// Registers `handler` for events of type `E`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// disposed or dropped.
    pub fn subscribe<E, F>(&self, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let type_id = TypeId::of::<E>();
        let handler: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(event);
            }
        });

        let mut handlers = self.registry.handlers.lock();
        let list = handlers.entry(type_id).or_default();
        Arc::make_mut(list).push(Registration { id, handler });
        trace!(event = type_name::<E>(), subscription = id, "subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            type_id,
            id,
        }
    }

    /// Number of handlers currently registered for `E`.
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.registry
            .handlers
            .lock()
            .get(&TypeId::of::<E>())
            .map_or(0, |list| list.len())
    }
}

/// A registered [`EventBus`] handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    registry: Weak<Registry>,
    type_id: TypeId,
    id: u64,
}

impl Subscription {
    /// Removes the handler. Equivalent to dropping the subscription.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.type_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Ping(u32);

    #[derive(Debug)]
    struct Pong;

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|n| {
                let seen = seen.clone();
                bus.subscribe(move |ping: &Ping| seen.lock().push((n, ping.0)))
            })
            .collect();

        bus.publish(Ping(7));
        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
        drop(subs);
    }

    #[test]
    fn test_events_are_routed_by_exact_type() {
        let bus = EventBus::new();
        let pings = Arc::new(AtomicU64::new(0));
        let counter = pings.clone();
        let _sub = bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Pong);
        bus.publish(Ping(1));
        assert_eq!(pings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_removes_only_that_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            bus.subscribe(move |_: &Ping| seen.lock().push("first"))
        };
        let _second = {
            let seen = seen.clone();
            bus.subscribe(move |_: &Ping| seen.lock().push("second"))
        };
        assert_eq!(bus.subscriber_count::<Ping>(), 2);

        first.dispose();
        bus.publish(Ping(0));
        assert_eq!(*seen.lock(), vec!["second"]);
        assert_eq!(bus.subscriber_count::<Ping>(), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_later_handlers() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));
        let _bad = bus.subscribe(|_: &Ping| panic!("handler exploded"));
        let counter = reached.clone();
        let _good = bus.subscribe(move |_: &Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Ping(1));
        bus.publish(Ping(2));
        assert_eq!(reached.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_during_publish_keeps_snapshot() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _killer = {
            let victim = victim.clone();
            bus.subscribe(move |_: &Ping| {
                victim.lock().take();
            })
        };
        let sub = {
            let seen = seen.clone();
            bus.subscribe(move |ping: &Ping| seen.lock().push(ping.0))
        };
        *victim.lock() = Some(sub);

        // the second handler was in the snapshot, so it still runs once
        bus.publish(Ping(1));
        bus.publish(Ping(2));
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[test]
    fn test_subscribe_during_publish_applies_to_next_publish() {
        let bus = EventBus::new();
        let late_calls = Arc::new(AtomicU64::new(0));
        let added: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let _adder = {
            let inner_bus = bus.clone();
            let added = added.clone();
            let late_calls = late_calls.clone();
            bus.subscribe(move |_: &Ping| {
                let late_calls = late_calls.clone();
                let sub = inner_bus.subscribe(move |_: &Ping| {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                });
                added.lock().push(sub);
            })
        };

        bus.publish(Ping(1));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        bus.publish(Ping(2));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe(|_: &Ping| {});
        drop(bus);
        drop(sub);
    }
}
