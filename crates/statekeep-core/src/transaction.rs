/// Transaction spans that coalesce store notifications.
///
/// A span does not defer state: every update is applied the moment it is
/// made. Only the notification waits until the outermost span closes, and
/// each store that changed inside the span notifies exactly once. Nothing is
/// rolled back when the wrapped code fails; the updates it already made stay
/// applied and are announced like any other.
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

/// A store with a notification waiting on the current span.
pub(crate) trait PendingFlush {
    fn name(&self) -> &str;
    fn flush(&self);
    /// Drops the waiting notification without calling listeners.
    fn discard(&self);
}

/// Stores still to be flushed at depth zero.
///
/// If a listener panics mid-flush, the stores not yet reached are discarded
/// on drop so none of them stays marked pending with no span to flush it.
struct FlushQueue {
    stores: std::vec::IntoIter<Rc<dyn PendingFlush>>,
}

impl Drop for FlushQueue {
    fn drop(&mut self) {
        for store in self.stores.by_ref() {
            tracing::warn!(
                store = store.name(),
                "notification dropped after a listener panicked during flush"
            );
            store.discard();
        }
    }
}

#[derive(Default)]
struct CoordinatorState {
    depth: Cell<usize>,
    /// Stores mutated in the current span, in first-mutation order.
    pending: RefCell<Vec<Rc<dyn PendingFlush>>>,
}

/// Shared nesting counter for a group of stores.
///
/// The coordinator is a cheap handle; clones refer to the same span state.
/// Stores opt in with [`crate::Store::with_coordinator`].
#[derive(Clone, Default)]
pub struct TransactionCoordinator {
    state: Rc<CoordinatorState>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("depth", &self.state.depth.get())
            .field("pending", &self.state.pending.borrow().len())
            .finish()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator with no open span.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a span. It closes when the returned guard is dropped.
    pub fn begin(&self) -> TransactionSpan {
        let depth = self.state.depth.get() + 1;
        self.state.depth.set(depth);
        tracing::trace!(depth, "transaction span opened");
        TransactionSpan {
            coordinator: self.clone(),
        }
    }

    /// Current nesting depth; zero when no span is open.
    pub fn depth(&self) -> usize {
        self.state.depth.get()
    }

    /// Whether a span is open.
    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Runs `f` inside a span.
    ///
    /// If `f` panics the span still closes and flushes while unwinding,
    /// then the panic continues to the caller.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _span = self.begin();
        f()
    }

    /// Runs a fallible `f` inside a span and returns its error unchanged.
    pub fn try_run<R, E>(&self, f: impl FnOnce() -> Result<R, E>) -> Result<R, E> {
        let _span = self.begin();
        f()
    }

    /// Keeps a span open across every suspension of `future`.
    ///
    /// The span opens on first poll and closes when the future completes.
    /// Dropping the future before completion also closes the span, and
    /// updates already made are flushed.
    pub fn run_async<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        let coordinator = self.clone();
        async move {
            let _span = coordinator.begin();
            future.await
        }
    }

    /// Wraps a function so that every call runs inside a span.
    pub fn wrap<A, R>(&self, f: impl Fn(A) -> R) -> impl Fn(A) -> R {
        let coordinator = self.clone();
        move |arg| coordinator.run(|| f(arg))
    }

    pub(crate) fn defer(&self, store: Rc<dyn PendingFlush>) {
        self.state.pending.borrow_mut().push(store);
    }

    fn close(&self) {
        let depth = self.state.depth.get().saturating_sub(1);
        self.state.depth.set(depth);
        tracing::trace!(depth, "transaction span closed");
        if depth > 0 {
            return;
        }

        let pending = std::mem::take(&mut *self.state.pending.borrow_mut());
        if pending.is_empty() {
            return;
        }
        tracing::debug!(
            stores = ?pending.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "flushing transaction"
        );
        let mut queue = FlushQueue {
            stores: pending.into_iter(),
        };
        for store in queue.stores.by_ref() {
            store.flush();
        }
    }
}

/// Guard for an open span.
#[must_use = "the span closes as soon as the guard is dropped"]
pub struct TransactionSpan {
    coordinator: TransactionCoordinator,
}

impl std::fmt::Debug for TransactionSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSpan")
            .field("depth", &self.coordinator.depth())
            .finish()
    }
}

impl Drop for TransactionSpan {
    fn drop(&mut self) {
        self.coordinator.close();
    }
}

/// Method-level transactions for types that own coordinated stores.
pub trait Transactional {
    fn coordinator(&self) -> &TransactionCoordinator;

    /// Runs `f` with `self` inside a span.
    fn transaction<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        self.coordinator().run(|| f(self))
    }
}

/// Pipeline form of [`TransactionCoordinator::run_async`].
pub trait TransactionFutureExt: Future + Sized {
    fn in_transaction(
        self,
        coordinator: &TransactionCoordinator,
    ) -> impl Future<Output = Self::Output> {
        coordinator.run_async(self)
    }
}

impl<F: Future> TransactionFutureExt for F {}
