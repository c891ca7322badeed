//! Copy-on-write listener tables.
//!
//! # Responsibilities
//! - Register listeners and hand back an unregistration handle
//! - Dispatch events to a snapshot of the listeners
//!
//! # Design Decisions
//! - Registration swaps in a new `Vec`; dispatch never takes a lock
//! - A `Subscription` unregisters on drop unless detached

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;

/// Event callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct TableInner<E> {
    listeners: ArcSwap<Vec<(u64, Listener<E>)>>,
    next_id: AtomicU64,
    write: Mutex<()>,
}

impl<E> TableInner<E> {
    fn unregister(&self, id: u64) {
        let _guard = self.write.lock().expect("listener table mutex poisoned");
        let current = self.listeners.load_full();
        let next: Vec<_> = current.iter().filter(|(i, _)| *i != id).cloned().collect();
        self.listeners.store(Arc::new(next));
    }
}

/// A set of listeners for events of type `E`.
pub struct ListenerTable<E> {
    inner: Arc<TableInner<E>>,
}

impl<E: 'static> ListenerTable<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TableInner {
                listeners: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
                write: Mutex::new(()),
            }),
        }
    }

    /// Register `listener`; it stays registered while the handle lives.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let _guard = self.inner.write.lock().expect("listener table mutex poisoned");
            let current = self.inner.listeners.load_full();
            let mut next: Vec<(u64, Listener<E>)> = current.as_ref().clone();
            next.push((id, Arc::new(listener)));
            self.inner.listeners.store(Arc::new(next));
        }
        let weak: Weak<TableInner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.unregister(id);
            }
        })
    }

    pub fn emit(&self, event: &E) {
        let snapshot = self.inner.listeners.load();
        for (_, listener) in snapshot.iter() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ListenerTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ListenerTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerTable")
            .field("listeners", &self.inner.listeners.load().len())
            .finish()
    }
}

/// Handle that unregisters its listener when dropped.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregister now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the listener registered for the lifetime of its table.
    pub fn detach(mut self) {
        self.cancel.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
