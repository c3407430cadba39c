/// Per-entity undo/redo history.
///
/// Each entity id owns an isolated [`HistoryState`] of `Option<Entity>`;
/// `None` marks the entity as absent from the store, so removing an entity
/// is a step that can be undone. Histories are created when an id is first
/// observed, or up front for ids listed in `entity_ids`. A removed entity
/// keeps its history until `clear` or `destroy(true)`.
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use statekeep_core::{EntityState, Store, Subscription};

use crate::config::EntityHistoryConfig;
use crate::error::HistoryError;
use crate::state::{HistoryState, Observation};
use crate::tracker::HistoryStatus;

type EntityHistory<S> = HistoryState<Option<<S as EntityState>::Entity>>;

/// Which tracked entities an operation applies to.
///
/// Ids that have no history are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySelector<K> {
    /// Every currently tracked id.
    All,
    One(K),
    Many(Vec<K>),
}

impl<K> EntitySelector<K> {
    pub fn one(id: K) -> Self {
        Self::One(id)
    }

    pub fn many(ids: impl IntoIterator<Item = K>) -> Self {
        Self::Many(ids.into_iter().collect())
    }
}

impl<K> From<Vec<K>> for EntitySelector<K> {
    fn from(ids: Vec<K>) -> Self {
        Self::Many(ids)
    }
}

struct EntityShared<S: EntityState> {
    store: Store<S>,
    allowed: Option<BTreeSet<S::Id>>,
    /// Bound given to histories created after construction. Existing
    /// histories carry their own.
    seed_max_age: usize,
    histories: RefCell<BTreeMap<S::Id, EntityHistory<S>>>,
    status: Store<BTreeMap<S::Id, HistoryStatus>>,
}

impl<S: EntityState + Clone + 'static> EntityShared<S> {
    fn is_tracked(&self, id: &S::Id) -> bool {
        self.allowed.as_ref().is_none_or(|allowed| allowed.contains(id))
    }

    fn observe(&self, state: &S) {
        let mut recorded = false;
        {
            let mut histories = self.histories.borrow_mut();
            let mut ids: BTreeSet<S::Id> = state.ids().into_iter().collect();
            ids.extend(histories.keys().cloned());

            for id in ids {
                if !self.is_tracked(&id) {
                    continue;
                }
                let current = state.entity(&id).cloned();
                match histories.get_mut(&id) {
                    Some(history) => {
                        let outcome = history.record(current);
                        if outcome == Observation::Recorded {
                            tracing::trace!(store = %self.store.name(), ?id, "entity change recorded");
                            recorded = true;
                        }
                    }
                    None => {
                        if current.is_some() {
                            tracing::trace!(store = %self.store.name(), ?id, "entity tracking started");
                            histories.insert(id, HistoryState::new(current, self.seed_max_age));
                            recorded = true;
                        }
                    }
                }
            }
        }
        if recorded {
            self.publish_status();
        }
    }

    fn selected(&self, selector: &EntitySelector<S::Id>) -> Vec<S::Id> {
        let histories = self.histories.borrow();
        match selector {
            EntitySelector::All => histories.keys().cloned().collect(),
            EntitySelector::One(id) => histories
                .contains_key(id)
                .then(|| vec![id.clone()])
                .unwrap_or_default(),
            EntitySelector::Many(ids) => ids
                .iter()
                .filter(|id| histories.contains_key(*id))
                .cloned()
                .collect(),
        }
    }

    /// Moves each selected history with `step` and writes every new
    /// present back in a single store update.
    fn navigate(
        &self,
        selector: &EntitySelector<S::Id>,
        mut step: impl FnMut(&mut EntityHistory<S>) -> bool,
    ) -> Vec<S::Id> {
        let ids = self.selected(selector);
        let mut changes = Vec::new();
        {
            let mut histories = self.histories.borrow_mut();
            for id in ids {
                if let Some(history) = histories.get_mut(&id) {
                    if step(history) {
                        changes.push((id, history.present().clone()));
                    }
                }
            }
        }
        if changes.is_empty() {
            return Vec::new();
        }

        let moved: Vec<S::Id> = changes.iter().map(|(id, _)| id.clone()).collect();
        tracing::debug!(store = %self.store.name(), ids = ?moved, "entity history moved");
        self.store.update(|state| {
            for (id, entity) in changes {
                state.put(id, entity);
            }
        });
        self.publish_status();
        moved
    }

    /// Checks `index` against every selected history before anything moves.
    fn check_index(
        &self,
        selector: &EntitySelector<S::Id>,
        index: usize,
        len_of: impl Fn(&EntityHistory<S>) -> usize,
    ) -> Result<(), HistoryError> {
        let histories = self.histories.borrow();
        for id in self.selected(selector) {
            if let Some(history) = histories.get(&id) {
                let len = len_of(history);
                if index >= len {
                    return Err(HistoryError::InvalidIndex { index, len });
                }
            }
        }
        Ok(())
    }

    fn publish_status(&self) {
        let status: BTreeMap<S::Id, HistoryStatus> = self
            .histories
            .borrow()
            .iter()
            .map(|(id, history)| {
                (
                    id.clone(),
                    HistoryStatus {
                        past: history.past().len(),
                        future: history.future().len(),
                    },
                )
            })
            .collect();
        if self.status.with(|current| *current != status) {
            self.status.set(status);
        }
    }
}

/// Undo/redo history kept separately for each entity of a store.
pub struct EntityHistoryTracker<S: EntityState> {
    shared: Rc<EntityShared<S>>,
    subscription: RefCell<Option<Subscription>>,
}

impl<S: EntityState> std::fmt::Debug for EntityHistoryTracker<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHistoryTracker")
            .field("store", &self.shared.store.name())
            .field("tracked", &self.shared.histories.borrow().len())
            .field("seed_max_age", &self.shared.seed_max_age)
            .field("active", &self.subscription.borrow().is_some())
            .finish()
    }
}

impl<S: EntityState + Clone + 'static> EntityHistoryTracker<S> {
    /// Starts tracking the entities of `store`.
    ///
    /// Entities already in the store start with empty history. Ids listed in
    /// `entity_ids` get a history even if they are not in the store yet.
    pub fn new(store: &Store<S>, config: EntityHistoryConfig<S::Id>) -> Self {
        let allowed: Option<BTreeSet<S::Id>> =
            config.entity_ids.map(|ids| ids.into_iter().collect());

        let histories = store.with(|state| {
            let seed: Vec<S::Id> = match &allowed {
                Some(allowed) => allowed.iter().cloned().collect(),
                None => state.ids(),
            };
            seed.into_iter()
                .map(|id| {
                    let present = state.entity(&id).cloned();
                    (id, HistoryState::new(present, config.max_age))
                })
                .collect::<BTreeMap<_, _>>()
        });

        let shared = Rc::new(EntityShared {
            status: Store::new(format!("{}.history", store.name()), BTreeMap::new()),
            store: store.clone(),
            allowed,
            seed_max_age: config.max_age,
            histories: RefCell::new(histories),
        });
        shared.publish_status();

        let weak = Rc::downgrade(&shared);
        let subscription = store.subscribe(move |state: &S| {
            if let Some(shared) = weak.upgrade() {
                shared.observe(state);
            }
        });
        tracing::debug!(
            store = %store.name(),
            tracked = shared.histories.borrow().len(),
            max_age = config.max_age,
            "entity history tracking started"
        );

        Self {
            shared,
            subscription: RefCell::new(Some(subscription)),
        }
    }

    /// Steps each selected entity back once. Returns the ids that moved.
    pub fn undo(&self, selector: EntitySelector<S::Id>) -> Vec<S::Id> {
        self.shared.navigate(&selector, |history| history.undo())
    }

    /// Steps each selected entity forward once. Returns the ids that moved.
    pub fn redo(&self, selector: EntitySelector<S::Id>) -> Vec<S::Id> {
        self.shared.navigate(&selector, |history| history.redo())
    }

    /// Moves each selected entity up to `steps` back or forward.
    pub fn jump(&self, selector: EntitySelector<S::Id>, steps: isize) -> Vec<S::Id> {
        self.shared
            .navigate(&selector, |history| history.jump(steps))
    }

    /// Makes `past[index]` the present for each selected entity.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidIndex`] if `index` is out of range for
    /// any selected entity; no entity moves in that case.
    pub fn jump_to_past(
        &self,
        selector: EntitySelector<S::Id>,
        index: usize,
    ) -> Result<Vec<S::Id>, HistoryError> {
        self.shared
            .check_index(&selector, index, |history| history.past().len())?;
        Ok(self
            .shared
            .navigate(&selector, |history| history.jump_to_past(index).is_ok()))
    }

    /// Makes `future[index]` the present for each selected entity.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidIndex`] if `index` is out of range for
    /// any selected entity; no entity moves in that case.
    pub fn jump_to_future(
        &self,
        selector: EntitySelector<S::Id>,
        index: usize,
    ) -> Result<Vec<S::Id>, HistoryError> {
        self.shared
            .check_index(&selector, index, |history| history.future().len())?;
        Ok(self
            .shared
            .navigate(&selector, |history| history.jump_to_future(index).is_ok()))
    }

    /// Empties the stacks of the selected entities.
    pub fn clear(&self, selector: EntitySelector<S::Id>) {
        let ids = self.shared.selected(&selector);
        {
            let mut histories = self.shared.histories.borrow_mut();
            for id in &ids {
                if let Some(history) = histories.get_mut(id) {
                    history.clear();
                }
            }
        }
        self.shared.publish_status();
    }

    /// The next change to each selected entity will not create a step.
    pub fn ignore_next(&self, selector: EntitySelector<S::Id>) {
        let ids = self.shared.selected(&selector);
        let mut histories = self.shared.histories.borrow_mut();
        for id in &ids {
            if let Some(history) = histories.get_mut(id) {
                history.ignore_next();
            }
        }
    }

    /// Stops listening to the store. With `clear_history`, every entity
    /// history is dropped.
    pub fn destroy(&self, clear_history: bool) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.unsubscribe();
            tracing::debug!(store = %self.shared.store.name(), "entity history tracking stopped");
        }
        if clear_history {
            self.shared.histories.borrow_mut().clear();
            self.shared.publish_status();
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscription.borrow().is_some()
    }

    /// Ids that currently have a history, in order.
    pub fn tracked_ids(&self) -> Vec<S::Id> {
        self.shared.histories.borrow().keys().cloned().collect()
    }

    /// The bound on `id`'s past stack, if it has a history.
    pub fn max_age(&self, id: &S::Id) -> Option<usize> {
        self.with_history(id, |h| h.max_age())
    }

    pub fn has_past(&self, id: &S::Id) -> bool {
        self.with_history(id, |h| h.has_past()).unwrap_or(false)
    }

    pub fn has_future(&self, id: &S::Id) -> bool {
        self.with_history(id, |h| h.has_future()).unwrap_or(false)
    }

    /// Past snapshots of `id`, oldest first. Empty for unknown ids.
    pub fn past(&self, id: &S::Id) -> Vec<Option<S::Entity>> {
        self.with_history(id, |h| h.past().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Future snapshots of `id`, next redo first. Empty for unknown ids.
    pub fn future(&self, id: &S::Id) -> Vec<Option<S::Entity>> {
        self.with_history(id, |h| h.future().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Per-id stack lengths as an observable store.
    pub fn status(&self) -> Store<BTreeMap<S::Id, HistoryStatus>> {
        self.shared.status.clone()
    }

    /// A copy of one entity's history.
    pub fn snapshot(&self, id: &S::Id) -> Option<EntityHistory<S>> {
        self.with_history(id, Clone::clone)
    }

    /// Copies of every entity history.
    pub fn snapshot_all(&self) -> BTreeMap<S::Id, EntityHistory<S>> {
        self.shared.histories.borrow().clone()
    }

    /// Installs a history for `id` and writes its present to the store.
    ///
    /// Ignored for ids excluded by `entity_ids`.
    pub fn restore(&self, id: S::Id, mut state: EntityHistory<S>) {
        if !self.shared.is_tracked(&id) {
            tracing::warn!(store = %self.shared.store.name(), ?id, "restore skipped for untracked id");
            return;
        }
        state.set_max_age(self.shared.seed_max_age);
        let present = state.present().clone();
        self.shared
            .histories
            .borrow_mut()
            .insert(id.clone(), state);
        self.shared.store.update(|s| s.put(id, present));
        self.shared.publish_status();
    }

    fn with_history<R>(&self, id: &S::Id, f: impl FnOnce(&EntityHistory<S>) -> R) -> Option<R> {
        self.shared.histories.borrow().get(id).map(f)
    }
}
