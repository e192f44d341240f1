//! Event fan-out to subscribers

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

type Callback<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

trait Registry: Send + Sync {
    fn remove(&self, id: u64) -> bool;
}

struct Inner<T> {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T: 'static> Registry for Inner<T> {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

/// Handle returned by `Dispatcher::subscribe`
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Registry>,
}

impl Subscription {
    /// Stop receiving events. Unsubscribing twice is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Ordered, failure-isolated fan-out
///
/// Every publish works on a snapshot of the subscriber list, so callbacks may
/// subscribe or unsubscribe (themselves included) while a publish is running.
pub struct Dispatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a callback; it runs after every earlier registration
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .push((id, Arc::new(callback)));

        let registry: Weak<dyn Registry> = Arc::downgrade(&self.inner) as Weak<dyn Registry>;
        Subscription { id, registry }
    }

    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Deliver `event` to every subscriber registered when the call starts
    ///
    /// Returns how many callbacks completed without error.
    pub fn publish(&self, event: &T) -> usize {
        let snapshot: Vec<(u64, Callback<T>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(subscription = id, error = %e, "Subscriber callback failed"),
                Err(_) => error!(subscription = id, "Subscriber callback panicked"),
            }
        }
        delivered
    }
}
