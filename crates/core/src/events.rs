//! Publish/subscribe for change notifications.
//!
//! Handlers are invoked synchronously on the publishing thread. A bus built
//! with a throttle window delivers at most one event per scope within that
//! window. The latest event suppressed in a window is kept per scope and
//! delivered by [`EventBus::flush`], so a burst always ends with its final
//! state reaching subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: Vec<(u64, Handler<E>)>,
    last_delivery: HashMap<String, Instant>,
    pending: HashMap<String, E>,
}

pub struct EventBus<E> {
    registry: Arc<Mutex<Registry<E>>>,
    throttle: Duration,
}

impl<E: Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::with_throttle(Duration::ZERO)
    }

    pub fn with_throttle(throttle: Duration) -> Self {
        EventBus {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                handlers: Vec::new(),
                last_delivery: HashMap::new(),
                pending: HashMap::new(),
            })),
            throttle,
        }
    }

    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Registers `handler`. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            registry.next_id += 1;
            let id = registry.next_id;
            registry.handlers.push((id, Arc::new(handler)));
            id
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            dispose: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    lock(&registry).handlers.retain(|(hid, _)| *hid != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).handlers.len()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Delivers `event` to every handler. Returns `false` when the event was
    /// suppressed by the throttle window for `scope`; it is then held as the
    /// scope's pending event, replacing any earlier one.
    pub fn publish(&self, scope: &str, event: &E) -> bool {
        let handlers = {
            let mut registry = lock(&self.registry);
            if !self.throttle.is_zero() {
                let now = Instant::now();
                if let Some(last) = registry.last_delivery.get(scope) {
                    if now.duration_since(*last) < self.throttle {
                        registry.pending.insert(scope.to_string(), event.clone());
                        return false;
                    }
                }
                registry.last_delivery.insert(scope.to_string(), now);
                registry.pending.remove(scope);
            }
            snapshot(&registry)
        };

        for handler in handlers {
            handler(event);
        }
        true
    }

    /// Delivers the event last suppressed for `scope`, if any, regardless of
    /// the throttle window. Returns whether one was delivered.
    pub fn flush(&self, scope: &str) -> bool {
        let (event, handlers) = {
            let mut registry = lock(&self.registry);
            let Some(event) = registry.pending.remove(scope) else {
                return false;
            };
            registry.last_delivery.insert(scope.to_string(), Instant::now());
            (event, snapshot(&registry))
        };

        for handler in handlers {
            handler(&event);
        }
        true
    }

    pub fn has_pending(&self, scope: &str) -> bool {
        lock(&self.registry).pending.contains_key(scope)
    }
}

fn snapshot<E>(registry: &Registry<E>) -> Vec<Handler<E>> {
    registry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
}

impl<E: Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &lock(&self.registry).handlers.len())
            .field("throttle", &self.throttle)
            .finish()
    }
}

fn lock<E>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disposer returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    /// Keeps the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.dispose = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
