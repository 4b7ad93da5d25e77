use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Minimal observer primitive: `subscribe(handler)` returns a
/// [`Subscription`] that detaches the handler when disposed or dropped.
///
/// Emission clones the handler list out of the lock first, so handlers may
/// re-enter the emitter (subscribe, dispose, or emit again) safely.
pub struct EventEmitter<T> {
    next_id: AtomicU64,
    handlers: Arc<Mutex<HashMap<u64, Handler<T>>>>,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .expect("emitter lock poisoned")
            .insert(id, Arc::new(handler));
        Subscription { id, handlers: Arc::downgrade(&self.handlers) }
    }

    /// Delivers `event` to every live handler in subscription order is not
    /// guaranteed; handlers registered during delivery see only later
    /// events.
    pub fn emit(&self, event: &T) {
        let handlers: Vec<Handler<T>> = {
            let guard = self.handlers.lock().expect("emitter lock poisoned");
            guard.values().cloned().collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().expect("emitter lock poisoned").len()
    }
}

/// Handle detaching one subscribed handler. Dropping it disposes.
pub struct Subscription<T> {
    id: u64,
    handlers: Weak<Mutex<HashMap<u64, Handler<T>>>>,
}

impl<T> Subscription<T> {
    pub fn dispose(&self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().expect("emitter lock poisoned").remove(&self.id);
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
