//! Observer primitive with scoped subscriptions.
//!
//! Every outward event stream in Aide (embedder state, queue state, tool-call
//! events, message deltas, opened ports) is an [`Emitter`]. Subscribing
//! returns a [`Subscription`] that removes its listener when dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    disposed: bool,
    listeners: BTreeMap<u64, Listener<T>>,
}

fn lock<T>(registry: &Mutex<Registry<T>>) -> MutexGuard<'_, Registry<T>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A multi-listener event source.
///
/// Listeners run synchronously inside [`Emitter::fire`], in subscription
/// order, without the registry lock held, so a listener may subscribe,
/// unsubscribe or fire again.
pub struct Emitter<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                disposed: false,
                listeners: BTreeMap::new(),
            })),
        }
    }

    /// Register a listener. It stays registered until the returned handle is
    /// dropped, or for the emitter's lifetime after [`Subscription::detach`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let mut registry = lock(&self.registry);

        if registry.disposed {
            return Subscription::inert();
        }

        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    // Dropped after the guard so a listener owning a
                    // subscription cannot re-enter the lock.
                    let removed = lock(&registry).listeners.remove(&id);
                    drop(removed);
                }
            })),
        }
    }

    /// Deliver `event` to every current listener.
    pub fn fire(&self, event: &T) {
        let listeners: Vec<Listener<T>> = {
            let registry = lock(&self.registry);
            if registry.disposed {
                return;
            }
            registry.listeners.values().cloned().collect()
        };

        for listener in listeners {
            listener(event);
        }
    }

    /// Drop all listeners. Later `fire` calls do nothing and later
    /// subscriptions are inert.
    pub fn dispose(&self) {
        let removed = {
            let mut registry = lock(&self.registry);
            registry.disposed = true;
            std::mem::take(&mut registry.listeners)
        };
        drop(removed);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`Emitter::subscribe`].
#[must_use = "dropping a Subscription immediately removes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { remove: None }
    }

    /// Keep the listener registered for as long as the emitter lives.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_reaches_listeners_in_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = seen.clone();
        let _s1 = emitter.subscribe(move |v| a.lock().unwrap().push(("a", *v)));
        let b = seen.clone();
        let _s2 = emitter.subscribe(move |v| b.lock().unwrap().push(("b", *v)));

        emitter.fire(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let sub = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.fire(&());
        drop(sub);
        emitter.fire(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_detach_keeps_listener() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        emitter
            .subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .detach();
        emitter.fire(&());
        emitter.fire(&());

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispose_silences_emitter() {
        let emitter = Emitter::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let _sub = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.dispose();
        emitter.fire(&());

        let c = count.clone();
        let _late = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.fire(&());

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_emitter_is_harmless() {
        let emitter = Emitter::<()>::new();
        let sub = emitter.subscribe(|_| {});
        drop(emitter);
        drop(sub);
    }
}
