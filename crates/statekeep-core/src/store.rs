/// Observable single-value store.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::subscription::Subscription;
use crate::transaction::{PendingFlush, TransactionCoordinator};

type Listener<S> = Rc<dyn Fn(&S)>;

struct StoreInner<S> {
    name: String,
    state: RefCell<S>,
    /// Registered listeners in registration order.
    listeners: RefCell<Vec<(u64, Listener<S>)>>,
    next_listener_id: Cell<u64>,
    /// Set while a notification is deferred by an open transaction span.
    pending: Cell<bool>,
    coordinator: Option<TransactionCoordinator>,
}

impl<S: Clone> StoreInner<S> {
    /// Delivers the current state to every listener.
    ///
    /// Neither the state nor the listener list stays borrowed while
    /// listeners run, so a listener may read or update any store.
    fn notify(&self) {
        let snapshot = self.state.borrow().clone();
        let listeners: Vec<Listener<S>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        tracing::trace!(store = %self.name, listeners = listeners.len(), "notifying");
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

impl<S: Clone> PendingFlush for StoreInner<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush(&self) {
        if self.pending.replace(false) {
            self.notify();
        }
    }

    fn discard(&self) {
        self.pending.set(false);
    }
}

/// A single state value with change notification.
///
/// Cloning a `Store` yields another handle to the same state. Updates are
/// applied immediately; only the notification is subject to transaction
/// batching.
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state)
            .field("listeners", &self.inner.listeners.borrow().len())
            .field("pending", &self.inner.pending.get())
            .finish()
    }
}

impl<S> Store<S> {
    /// Returns the store name used in log output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Whether a notification is waiting for the current span to close.
    pub fn has_pending_notification(&self) -> bool {
        self.inner.pending.get()
    }

    /// The coordinator this store is bound to, if any.
    pub fn coordinator(&self) -> Option<&TransactionCoordinator> {
        self.inner.coordinator.as_ref()
    }

    /// Whether both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: Clone + 'static> Store<S> {
    /// Creates a standalone store that always notifies immediately.
    pub fn new(name: impl Into<String>, initial: S) -> Self {
        Self::build(name.into(), initial, None)
    }

    /// Creates a store whose notifications are batched by `coordinator`.
    pub fn with_coordinator(
        name: impl Into<String>,
        initial: S,
        coordinator: &TransactionCoordinator,
    ) -> Self {
        Self::build(name.into(), initial, Some(coordinator.clone()))
    }

    fn build(name: String, initial: S, coordinator: Option<TransactionCoordinator>) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                name,
                state: RefCell::new(initial),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(0),
                pending: Cell::new(false),
                coordinator,
            }),
        }
    }

    /// Returns a clone of the current state.
    pub fn get_value(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Reads the current state without cloning it.
    pub fn with<R>(&self, reader: impl FnOnce(&S) -> R) -> R {
        reader(&self.inner.state.borrow())
    }

    /// Applies `mutator` to the state and announces the change.
    ///
    /// The mutator must not access this store; the state is mutably
    /// borrowed while it runs.
    pub fn update(&self, mutator: impl FnOnce(&mut S)) {
        {
            let mut state = self.inner.state.borrow_mut();
            mutator(&mut state);
        }
        self.changed();
    }

    /// Replaces the state.
    pub fn set(&self, value: S) {
        self.update(move |state| *state = value);
    }

    /// Registers a listener called with the new state after every change.
    pub fn subscribe(&self, listener: impl Fn(&S) + 'static) -> Subscription {
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id + 1);
        let listener: Listener<S> = Rc::new(listener);
        self.inner.listeners.borrow_mut().push((id, listener));

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .listeners
                    .borrow_mut()
                    .retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    fn changed(&self) {
        match &self.inner.coordinator {
            Some(coordinator) if coordinator.is_active() => {
                // Register once per span; later updates just ride along.
                if !self.inner.pending.replace(true) {
                    let pending: Rc<dyn PendingFlush> = self.inner.clone();
                    coordinator.defer(pending);
                }
                tracing::trace!(store = %self.inner.name, "notification deferred");
            }
            _ => {
                // A flush already queued for this store has nothing left to say.
                self.inner.pending.set(false);
                self.inner.notify();
            }
        }
    }
}
