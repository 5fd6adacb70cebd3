//! Broadcaster for the latest snapshot of one dashboard domain object.
//!
//! A [`StateStore`] holds at most one snapshot. Pollers replace it with [`StateStore::push`];
//! consumers read it with [`StateStore::current`] and register observers to be told about every
//! later push. Observers are identified by their `Arc` allocation, so the handle used to
//! subscribe is the handle used to unsubscribe.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tracing::debug;

pub type Observer<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Wraps a closure as an [`Observer`]; keep the returned handle to unsubscribe later.
pub fn observer<T, F>(f: F) -> Observer<T>
where
    F: Fn(&Arc<T>) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, PartialEq, Eq)]
pub enum Snapshot<T> {
    NotLoaded,
    Loaded(Arc<T>),
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        match self {
            Self::NotLoaded => Self::NotLoaded,
            Self::Loaded(value) => Self::Loaded(Arc::clone(value)),
        }
    }
}

impl<T> Snapshot<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn loaded(&self) -> Option<&Arc<T>> {
        match self {
            Self::NotLoaded => None,
            Self::Loaded(value) => Some(value),
        }
    }
}

struct Inner<T> {
    current: Snapshot<T>,
    observers: Vec<Observer<T>>,
    pending: VecDeque<Arc<T>>,
    dispatching: bool,
}

pub struct StateStore<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
}

impl<T> std::fmt::Debug for StateStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StateStore")
            .field("name", &self.name)
            .field("loaded", &inner.current.is_loaded())
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl<T> StateStore<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Inner {
                current: Snapshot::NotLoaded,
                observers: Vec::new(),
                pending: VecDeque::new(),
                dispatching: false,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panicking observer never runs under the lock, so the state is always consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Snapshot<T> {
        self.lock().current.clone()
    }

    /// Registers `observer` for every later push. Subscribing an already registered observer is
    /// a no-op.
    pub fn subscribe(&self, observer: &Observer<T>) {
        let mut inner = self.lock();
        if inner.observers.iter().any(|o| Arc::ptr_eq(o, observer)) {
            return;
        }
        inner.observers.push(Arc::clone(observer));
    }

    pub fn unsubscribe(&self, observer: &Observer<T>) {
        self.lock().observers.retain(|o| !Arc::ptr_eq(o, observer));
    }

    /// Subscribes for the lifetime of the returned guard.
    pub fn subscribe_scoped(self: &Arc<Self>, observer: Observer<T>) -> Subscription<T> {
        self.subscribe(&observer);
        Subscription {
            store: Arc::downgrade(self),
            observer,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Replaces the current snapshot and notifies observers in registration order.
    ///
    /// Pushes are serialized: a push issued while another one is being dispatched (from another
    /// thread or from inside an observer) is queued and delivered by the dispatching caller once
    /// the earlier snapshot has reached every observer.
    pub fn push(&self, value: impl Into<Arc<T>>) {
        let value = value.into();
        {
            let mut inner = self.lock();
            inner.current = Snapshot::Loaded(Arc::clone(&value));
            inner.pending.push_back(value);
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        let mut guard = DispatchGuard {
            store: self,
            armed: true,
        };
        loop {
            let next = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(value) => Some((value, inner.observers.clone())),
                    None => {
                        inner.dispatching = false;
                        None
                    }
                }
            };
            let Some((value, observers)) = next else {
                guard.armed = false;
                return;
            };

            debug!(
                store = self.name,
                observers = observers.len(),
                "dispatching snapshot"
            );
            for observer in &observers {
                observer(&value);
            }
        }
    }

    /// Drops the snapshot, every observer and anything still queued.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.current = Snapshot::NotLoaded;
        inner.observers.clear();
        inner.pending.clear();
    }
}

struct DispatchGuard<'a, T> {
    store: &'a StateStore<T>,
    armed: bool,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        // Only reached while unwinding out of an observer.
        if self.armed {
            let mut inner = self.store.lock();
            inner.dispatching = false;
            inner.pending.clear();
        }
    }
}

/// Keeps an observer registered until dropped.
pub struct Subscription<T> {
    store: Weak<StateStore<T>>,
    observer: Observer<T>,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(&self.observer);
        }
    }
}
