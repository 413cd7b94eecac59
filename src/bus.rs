//! Topic-based fan-out between the background service and page agents.
//!
//! Handlers are called synchronously by [`EventBus::publish`]. A handler that
//! answers [`Delivery::Discarded`] has lost its receiver; it is counted in the
//! [`PublishReport`] and dropped from the registry instead of failing the
//! publisher.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome of handing one payload to one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The handler accepted the payload.
    Delivered,
    /// The recipient is gone; the handler will be removed.
    Discarded,
}

/// Counts from one [`EventBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that accepted the payload.
    pub delivered: usize,
    /// Handlers whose recipient had gone away.
    pub discarded: usize,
}

type Handler<P> = Arc<dyn Fn(&P) -> Delivery + Send + Sync>;
type Registry<P> = HashMap<String, Vec<(u64, Handler<P>)>>;

/// Cloneable handle to a shared handler registry.
pub struct EventBus<P> {
    registry: Arc<Mutex<Registry<P>>>,
    next_id: Arc<AtomicU64>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let handlers: usize = registry.values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("topics", &registry.len())
            .field("handlers", &handlers)
            .finish()
    }
}

impl<P: Send + 'static> EventBus<P> {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`. Dropping or unsubscribing the returned
    /// [`Subscription`] stops delivery.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&P) -> Delivery + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: Handler<P> = Arc::new(handler);
        self.lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));

        let registry = Arc::downgrade(&self.registry);
        let topic = topic.to_string();
        Subscription::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handlers) = registry.get_mut(&topic) {
                handlers.retain(|(handler_id, _)| *handler_id != id);
                if handlers.is_empty() {
                    registry.remove(&topic);
                }
            }
        })
    }

    /// Delivers `payload` to every handler registered for `topic`.
    pub fn publish(&self, topic: &str, payload: &P) -> PublishReport {
        let handlers: Vec<(u64, Handler<P>)> = self
            .lock()
            .get(topic)
            .map(|handlers| handlers.to_vec())
            .unwrap_or_default();

        let mut report = PublishReport::default();
        let mut gone = Vec::new();
        for (id, handler) in handlers {
            match handler(payload) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Discarded => {
                    report.discarded += 1;
                    gone.push(id);
                }
            }
        }

        if !gone.is_empty() {
            let mut registry = self.lock();
            if let Some(handlers) = registry.get_mut(topic) {
                handlers.retain(|(id, _)| !gone.contains(id));
                if handlers.is_empty() {
                    registry.remove(topic);
                }
            }
        }
        debug!(
            topic,
            delivered = report.delivered,
            discarded = report.discarded,
            "published event"
        );
        report
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<P>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Clone + Send + 'static> EventBus<P> {
    /// Subscribes a channel to `topic`. Once the receiver is dropped the next
    /// publish reports the handler as discarded.
    pub fn subscribe_channel(&self, topic: &str) -> (Subscription, mpsc::UnboundedReceiver<P>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(topic, move |payload: &P| {
            match tx.send(payload.clone()) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Discarded,
            }
        });
        (subscription, rx)
    }
}

/// Handle returned by a subscribe call.
///
/// The registration is removed when the handle is dropped or
/// [`Subscription::unsubscribe`] is called, whichever comes first.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps a cancellation callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops delivery. Calling it more than once is harmless.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// True until the subscription has been cancelled.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
