//! Listener registry for table and collection events.
//!
//! Callbacks are keyed by a [`ListenerId`] in subscription order. `emit`
//! clones the current callbacks out of the lock before invoking them, so a
//! callback may subscribe or unsubscribe freely; such changes apply from the
//! next `emit` on.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Handle returned by [`EventEmitter::on`].
pub type ListenerId = u64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next: ListenerId,
    callbacks: BTreeMap<ListenerId, Callback<T>>,
}

pub struct EventEmitter<T> {
    registry: RwLock<Registry<T>>,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                next: 1,
                callbacks: BTreeMap::new(),
            }),
        }
    }

    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let mut registry = self.registry.write();
        let id = registry.next;
        registry.next += 1;
        registry.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.registry.write().callbacks.remove(&id);
    }

    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> =
            self.registry.read().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.read().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().callbacks.is_empty()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
