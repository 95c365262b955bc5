//! Multi-subscriber notification
//!
//! Subscribers either register a handler closure or take a channel
//! receiver. Handlers run on the publishing thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

/// Handle returned by [`Event::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A multi-subscriber event
pub struct Event<T> {
    handlers: RwLock<Vec<(SubscriptionId, Handler<T>)>>,
    channels: Mutex<Vec<Sender<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: Clone + Send + 'static> Event<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Receive every published value on a channel.
    /// Dropping the receiver unsubscribes it.
    pub fn channel(&self) -> Receiver<T> {
        let (tx, rx) = channel::unbounded();
        self.channels.lock().push(tx);
        rx
    }

    pub fn publish(&self, value: &T) {
        // Snapshot so handlers may (un)subscribe while running
        let handlers: Vec<Handler<T>> = self.handlers.read().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(value);
        }

        self.channels
            .lock()
            .retain(|tx| tx.send(value.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len() + self.channels.lock().len()
    }
}
