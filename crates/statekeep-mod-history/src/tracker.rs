/// Undo/redo history for a whole store or one projected part of it.
///
/// The tracker listens to the store's change stream. Every change that
/// differs from the last known present becomes a history step; undo, redo
/// and jumps write the selected snapshot back through the store, and the
/// echo of that write is recognized as "unchanged" rather than recorded.
/// Because recognition compares values instead of relying on a flag, it
/// still holds when a transaction defers the echo.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statekeep_core::{Store, Subscription};

use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::projection::Projection;
use crate::state::{HistoryState, Observation};

/// Stack lengths published after every history change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStatus {
    pub past: usize,
    pub future: usize,
}

impl HistoryStatus {
    pub fn has_past(&self) -> bool {
        self.past > 0
    }

    pub fn has_future(&self) -> bool {
        self.future > 0
    }

    fn of<T>(state: &HistoryState<T>) -> Self {
        Self {
            past: state.past().len(),
            future: state.future().len(),
        }
    }
}

struct TrackerShared<S, P> {
    store: Store<S>,
    projection: Projection<S, P>,
    history: RefCell<HistoryState<P>>,
    status: Store<HistoryStatus>,
}

impl<S: Clone + 'static, P: Clone + PartialEq + 'static> TrackerShared<S, P> {
    fn observe(&self, state: &S) {
        let value = self.projection.read(state);
        let outcome = self.history.borrow_mut().record(value);
        tracing::trace!(
            store = %self.store.name(),
            watch = %self.projection.label(),
            ?outcome,
            "observed change"
        );
        if outcome == Observation::Recorded {
            self.publish_status();
        }
    }

    /// Runs a stack move and writes the new present back to the store.
    fn navigate(&self, step: impl FnOnce(&mut HistoryState<P>) -> bool) -> bool {
        let target = {
            let mut history = self.history.borrow_mut();
            if !step(&mut history) {
                return false;
            }
            history.present().clone()
        };
        self.store
            .update(|state| self.projection.write(state, target));
        self.publish_status();
        true
    }

    fn publish_status(&self) {
        let status = HistoryStatus::of(&self.history.borrow());
        tracing::debug!(
            store = %self.store.name(),
            past = status.past,
            future = status.future,
            "history changed"
        );
        if self.status.with(|current| *current != status) {
            self.status.set(status);
        }
    }
}

/// Bounded undo/redo history bound to one store.
///
/// `P` is the tracked part of the state; it is the whole state unless the
/// tracker was built with a [`Projection`].
pub struct HistoryTracker<S, P = S> {
    shared: Rc<TrackerShared<S, P>>,
    subscription: RefCell<Option<Subscription>>,
}

impl<S, P> std::fmt::Debug for HistoryTracker<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let history = self.shared.history.borrow();
        f.debug_struct("HistoryTracker")
            .field("store", &self.shared.store.name())
            .field("watch", &self.shared.projection.label())
            .field("past_len", &history.past().len())
            .field("future_len", &history.future().len())
            .field("max_age", &history.max_age())
            .field("active", &self.subscription.borrow().is_some())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static> HistoryTracker<S, S> {
    /// Tracks the whole state of `store`.
    ///
    /// `watch_property` only applies to JSON stores; see
    /// [`HistoryTracker::for_json`].
    pub fn new(store: &Store<S>, config: HistoryConfig) -> Self {
        if let Some(property) = &config.watch_property {
            tracing::warn!(
                store = %store.name(),
                %property,
                "watch_property ignored for typed state; tracking the whole state"
            );
        }
        Self::with_projection(store, Projection::whole(), config)
    }
}

impl HistoryTracker<Value, Value> {
    /// Tracks a JSON store, honoring `watch_property`.
    pub fn for_json(store: &Store<Value>, config: HistoryConfig) -> Self {
        let projection = match &config.watch_property {
            Some(property) => Projection::property(property.clone()),
            None => Projection::whole(),
        };
        Self::with_projection(store, projection, config)
    }
}

impl<S: Clone + 'static, P: Clone + PartialEq + 'static> HistoryTracker<S, P> {
    /// Tracks the part of `store` selected by `projection`.
    pub fn with_projection(
        store: &Store<S>,
        projection: Projection<S, P>,
        config: HistoryConfig,
    ) -> Self {
        let present = store.with(|state| projection.read(state));
        let shared = Rc::new(TrackerShared {
            status: Store::new(format!("{}.history", store.name()), HistoryStatus::default()),
            store: store.clone(),
            projection,
            history: RefCell::new(HistoryState::new(present, config.max_age)),
        });

        let weak = Rc::downgrade(&shared);
        let subscription = store.subscribe(move |state: &S| {
            if let Some(shared) = weak.upgrade() {
                shared.observe(state);
            }
        });
        tracing::debug!(
            store = %store.name(),
            watch = %shared.projection.label(),
            max_age = config.max_age,
            "history tracking started"
        );

        Self {
            shared,
            subscription: RefCell::new(Some(subscription)),
        }
    }

    /// Restores the previous snapshot. No-op without past.
    pub fn undo(&self) -> bool {
        self.shared.navigate(|history| history.undo())
    }

    /// Re-applies the next snapshot. No-op without future.
    pub fn redo(&self) -> bool {
        self.shared.navigate(|history| history.redo())
    }

    /// Undoes (negative) or redoes (positive) up to `steps` at once.
    pub fn jump(&self, steps: isize) -> bool {
        self.shared.navigate(|history| history.jump(steps))
    }

    /// Makes `past()[index]` the present.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidIndex`] if `index` is out of range;
    /// nothing changes in that case.
    pub fn jump_to_past(&self, index: usize) -> Result<(), HistoryError> {
        let len = self.past_len();
        if index >= len {
            return Err(HistoryError::InvalidIndex { index, len });
        }
        self.shared
            .navigate(|history| history.jump_to_past(index).is_ok());
        Ok(())
    }

    /// Makes `future()[index]` the present.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidIndex`] if `index` is out of range;
    /// nothing changes in that case.
    pub fn jump_to_future(&self, index: usize) -> Result<(), HistoryError> {
        let len = self.future_len();
        if index >= len {
            return Err(HistoryError::InvalidIndex { index, len });
        }
        self.shared
            .navigate(|history| history.jump_to_future(index).is_ok());
        Ok(())
    }

    /// Empties both stacks. The store is not touched.
    pub fn clear(&self) {
        self.shared.history.borrow_mut().clear();
        self.shared.publish_status();
    }

    /// The next store change will not create a history step.
    pub fn ignore_next(&self) {
        self.shared.history.borrow_mut().ignore_next();
    }

    /// Stops listening to the store, optionally clearing the history.
    pub fn destroy(&self, clear_history: bool) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.unsubscribe();
            tracing::debug!(store = %self.shared.store.name(), "history tracking stopped");
        }
        if clear_history {
            self.clear();
        }
    }

    /// Whether the tracker still listens to the store.
    pub fn is_active(&self) -> bool {
        self.subscription.borrow().is_some()
    }

    pub fn has_past(&self) -> bool {
        self.shared.history.borrow().has_past()
    }

    pub fn has_future(&self) -> bool {
        self.shared.history.borrow().has_future()
    }

    pub fn past_len(&self) -> usize {
        self.shared.history.borrow().past().len()
    }

    pub fn future_len(&self) -> usize {
        self.shared.history.borrow().future().len()
    }

    /// Past snapshots, oldest first.
    pub fn past(&self) -> Vec<P> {
        self.shared.history.borrow().past().iter().cloned().collect()
    }

    /// Future snapshots, next redo first.
    pub fn future(&self) -> Vec<P> {
        self.shared.history.borrow().future().iter().cloned().collect()
    }

    /// The last snapshot seen or applied.
    pub fn present(&self) -> P {
        self.shared.history.borrow().present().clone()
    }

    pub fn max_age(&self) -> usize {
        self.shared.history.borrow().max_age()
    }

    /// Stack lengths as an observable store.
    pub fn status(&self) -> Store<HistoryStatus> {
        self.shared.status.clone()
    }

    /// Calls `listener` with the current `has_past` value and again each
    /// time it flips.
    pub fn subscribe_has_past(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        self.watch_flag(HistoryStatus::has_past, listener)
    }

    /// Calls `listener` with the current `has_future` value and again each
    /// time it flips.
    pub fn subscribe_has_future(&self, listener: impl Fn(bool) + 'static) -> Subscription {
        self.watch_flag(HistoryStatus::has_future, listener)
    }

    fn watch_flag(
        &self,
        flag: fn(&HistoryStatus) -> bool,
        listener: impl Fn(bool) + 'static,
    ) -> Subscription {
        let initial = self.shared.status.with(flag);
        listener(initial);
        let last = Cell::new(initial);
        self.shared.status.subscribe(move |status: &HistoryStatus| {
            let value = flag(status);
            if last.replace(value) != value {
                listener(value);
            }
        })
    }

    /// A copy of the history, e.g. for persistence.
    pub fn snapshot(&self) -> HistoryState<P> {
        self.shared.history.borrow().clone()
    }

    /// Replaces the history and writes its present back to the store.
    ///
    /// The tracker's own `max_age` applies to the restored past.
    pub fn restore(&self, mut state: HistoryState<P>) {
        state.set_max_age(self.max_age());
        let present = state.present().clone();
        *self.shared.history.borrow_mut() = state;
        self.shared
            .store
            .update(|s| self.shared.projection.write(s, present));
        self.shared.publish_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statekeep_core::TransactionCoordinator;

    fn tracked(max_age: usize) -> (Store<i32>, HistoryTracker<i32>) {
        let store = Store::new("counter", 0);
        let tracker = HistoryTracker::new(&store, HistoryConfig::default().with_max_age(max_age));
        (store, tracker)
    }

    #[test]
    fn test_records_each_change() {
        let (store, tracker) = tracked(10);
        store.set(1);
        store.set(2);
        assert_eq!(tracker.past(), vec![0, 1]);
        assert_eq!(tracker.present(), 2);
    }

    #[test]
    fn test_max_age_bound() {
        let (store, tracker) = tracked(3);
        for n in 1..=5 {
            store.set(n);
        }
        assert_eq!(tracker.past(), vec![2, 3, 4]);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (store, tracker) = tracked(10);
        store.set(1);
        store.set(2);

        assert!(tracker.undo());
        assert_eq!(store.get_value(), 1);
        assert!(tracker.has_future());

        assert!(tracker.undo());
        assert_eq!(store.get_value(), 0);
        assert!(!tracker.has_past());

        assert!(tracker.redo());
        assert_eq!(store.get_value(), 1);
        assert_eq!(tracker.past(), vec![0]);
        assert_eq!(tracker.future(), vec![2]);
    }

    #[test]
    fn test_undo_without_past_is_noop() {
        let (store, tracker) = tracked(10);
        assert!(!tracker.undo());
        assert!(!tracker.redo());
        assert_eq!(store.get_value(), 0);
    }

    #[test]
    fn test_fresh_change_clears_future() {
        let (store, tracker) = tracked(10);
        store.set(1);
        store.set(2);
        tracker.undo();
        assert!(tracker.has_future());

        store.set(5);
        assert!(!tracker.has_future());
        assert_eq!(tracker.past(), vec![0, 1]);
    }

    #[test]
    fn test_ignore_next() {
        let (store, tracker) = tracked(10);
        store.set(1);
        tracker.ignore_next();
        store.set(2);
        assert_eq!(tracker.past(), vec![0]);
        assert!(!tracker.has_future());

        // Undo goes back past the ignored change.
        tracker.undo();
        assert_eq!(store.get_value(), 0);
    }

    #[test]
    fn test_jump_applies_once() {
        let (store, tracker) = tracked(10);
        for n in 1..=4 {
            store.set(n);
        }
        let writes = Rc::new(Cell::new(0));
        let sink = Rc::clone(&writes);
        let _sub = store.subscribe(move |_: &i32| sink.set(sink.get() + 1));

        assert!(tracker.jump(-3));
        assert_eq!(store.get_value(), 1);
        assert_eq!(writes.get(), 1);
        assert_eq!(tracker.future(), vec![2, 3, 4]);

        assert!(tracker.jump(2));
        assert_eq!(store.get_value(), 3);
        assert_eq!(writes.get(), 2);
    }

    #[test]
    fn test_jump_to_index() {
        let (store, tracker) = tracked(10);
        for n in 1..=4 {
            store.set(n);
        }
        tracker.jump_to_past(1).unwrap();
        assert_eq!(store.get_value(), 1);
        tracker.jump_to_future(1).unwrap();
        assert_eq!(store.get_value(), 3);

        assert_eq!(
            tracker.jump_to_future(5),
            Err(HistoryError::InvalidIndex { index: 5, len: 1 })
        );
        assert_eq!(store.get_value(), 3);
    }

    #[test]
    fn test_clear_keeps_store() {
        let (store, tracker) = tracked(10);
        store.set(1);
        store.set(2);
        tracker.undo();
        tracker.clear();
        assert!(!tracker.has_past());
        assert!(!tracker.has_future());
        assert_eq!(store.get_value(), 1);
    }

    #[test]
    fn test_destroy_unsubscribes() {
        let (store, tracker) = tracked(10);
        store.set(1);
        assert_eq!(store.listener_count(), 1);

        tracker.destroy(false);
        assert!(!tracker.is_active());
        assert_eq!(store.listener_count(), 0);

        store.set(2);
        assert_eq!(tracker.past(), vec![0]);
    }

    #[test]
    fn test_destroy_with_clear() {
        let (store, tracker) = tracked(10);
        store.set(1);
        tracker.destroy(true);
        assert!(!tracker.has_past());
    }

    #[test]
    fn test_dropping_tracker_unsubscribes() {
        let store = Store::new("counter", 0);
        {
            let _tracker = HistoryTracker::new(&store, HistoryConfig::default());
            assert_eq!(store.listener_count(), 1);
        }
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_has_past_flag_is_reactive() {
        let (store, tracker) = tracked(10);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = tracker.subscribe_has_past(move |v| sink.borrow_mut().push(v));

        store.set(1);
        store.set(2);
        tracker.undo();
        tracker.undo();

        assert_eq!(*seen.borrow(), vec![false, true, false]);
    }

    #[test]
    fn test_has_future_flag_is_reactive() {
        let (store, tracker) = tracked(10);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = tracker.subscribe_has_future(move |v| sink.borrow_mut().push(v));

        store.set(1);
        tracker.undo();
        tracker.redo();

        assert_eq!(*seen.borrow(), vec![false, true, false]);
        assert_eq!(tracker.status().get_value(), HistoryStatus { past: 1, future: 0 });
    }

    #[test]
    fn test_undo_inside_transaction_is_not_recorded() {
        let coordinator = TransactionCoordinator::new();
        let store = Store::with_coordinator("counter", 0, &coordinator);
        let tracker = HistoryTracker::new(&store, HistoryConfig::default());
        store.set(1);
        store.set(2);

        coordinator.run(|| {
            tracker.undo();
        });

        assert_eq!(store.get_value(), 1);
        assert_eq!(tracker.past(), vec![0]);
        assert_eq!(tracker.future(), vec![2]);
    }

    #[test]
    fn test_transaction_records_one_step() {
        let coordinator = TransactionCoordinator::new();
        let store = Store::with_coordinator("counter", 0, &coordinator);
        let tracker = HistoryTracker::new(&store, HistoryConfig::default());

        coordinator.run(|| {
            store.set(1);
            store.set(2);
            store.set(3);
        });

        assert_eq!(tracker.past(), vec![0]);
        tracker.undo();
        assert_eq!(store.get_value(), 0);
    }

    #[test]
    fn test_watch_property_patches_only_property() {
        let store = Store::new("todos", json!({"filter": "all", "items": []}));
        let tracker = HistoryTracker::for_json(
            &store,
            HistoryConfig::default().with_watch_property("filter"),
        );

        store.update(|s| s["filter"] = json!("done"));
        store.update(|s| s["items"] = json!([1]));

        // Only the filter change is a step.
        assert_eq!(tracker.past(), vec![json!("all")]);

        tracker.undo();
        assert_eq!(store.get_value(), json!({"filter": "all", "items": [1]}));
    }

    #[test]
    fn test_watch_property_ignored_for_typed_state() {
        let store = Store::new("counter", 0);
        let tracker = HistoryTracker::new(
            &store,
            HistoryConfig::default().with_watch_property("value"),
        );
        store.set(1);
        assert_eq!(tracker.past(), vec![0]);
    }

    #[test]
    fn test_snapshot_and_restore() {
        let (store, tracker) = tracked(10);
        store.set(1);
        store.set(2);
        tracker.undo();
        let snapshot = tracker.snapshot();

        let other = Store::new("copy", 99);
        let restored = HistoryTracker::new(&other, HistoryConfig::default().with_max_age(1));
        restored.restore(snapshot);

        assert_eq!(other.get_value(), 1);
        assert_eq!(restored.past(), vec![0]);
        assert_eq!(restored.future(), vec![2]);
        assert_eq!(restored.max_age(), 1);
        assert_eq!(restored.snapshot().max_age(), 1);

        restored.redo();
        assert_eq!(other.get_value(), 2);
        assert_eq!(restored.past(), vec![1]);
    }
}
