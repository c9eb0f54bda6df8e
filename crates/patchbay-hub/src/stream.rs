//! Explicit publish/subscribe streams
//!
//! A [`Publisher`] fans values out to any number of subscribers. Every
//! subscriber holds a [`Subscription`] handle; cancelling it (or dropping it)
//! removes the subscriber, so no listener outlives its owner.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

struct Subscribers<T> {
    next_id: u64,
    senders: BTreeMap<u64, mpsc::UnboundedSender<T>>,
}

/// Multi-subscriber broadcast point
pub struct Publisher<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: BTreeMap::new(),
            })),
        }
    }

    /// Register a subscriber. Values published from now on are queued on the
    /// returned receiver until the subscription is cancelled.
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut subscribers = self.subscribers.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.senders.insert(id, tx);
            id
        };

        let registry: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.subscribers);
        let subscription = Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().senders.remove(&id);
                }
            })),
        };
        (subscription, rx)
    }

    /// Deliver `value` to every live subscriber; returns how many received it
    pub fn publish(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers
            .senders
            .retain(|_, tx| tx.send(value.clone()).is_ok());
        subscribers.senders.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().senders.len()
    }
}

impl<T: Clone + Send + 'static> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle for one subscriber
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the subscriber. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
