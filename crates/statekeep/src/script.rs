/// Replays a JSON script of store operations against a tracked store.
use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use statekeep_core::{Store, Subscription, TransactionCoordinator};
use statekeep_mod_history::{HistoryConfig, HistoryPersistence, HistoryState, HistoryTracker};

/// One scripted operation.
///
/// Unit steps are plain strings (`"undo"`); the rest are single-key
/// objects (`{"set": {...}}`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Replace the whole state.
    Set(Value),
    /// Merge top-level members into an object state.
    Patch(Map<String, Value>),
    /// Run nested steps inside one transaction span.
    Transaction(Vec<Step>),
    Undo,
    Redo,
    Jump(isize),
    JumpToPast(usize),
    JumpToFuture(usize),
    IgnoreNext,
    Clear,
}

/// Outcome printed after a replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub state: Value,
    /// Store notifications delivered by the steps. Restoring saved history
    /// is not counted.
    pub notifications: usize,
    pub past: Vec<Value>,
    pub future: Vec<Value>,
}

/// Where to load and save the history between runs.
#[derive(Debug, Clone, Copy)]
pub struct PersistTarget<'a> {
    pub persistence: &'a HistoryPersistence,
    pub key: &'a str,
}

struct Session {
    coordinator: TransactionCoordinator,
    store: Store<Value>,
    tracker: HistoryTracker<Value>,
    notifications: Rc<Cell<usize>>,
    _listener: Subscription,
}

impl Session {
    /// Builds the store and tracker, installs `saved` history if given, and
    /// only then starts counting notifications.
    fn new(initial: Value, config: HistoryConfig, saved: Option<HistoryState<Value>>) -> Self {
        let coordinator = TransactionCoordinator::new();
        let store = Store::with_coordinator("script", initial, &coordinator);
        let tracker = HistoryTracker::for_json(&store, config);
        if let Some(history) = saved {
            tracker.restore(history);
        }
        let notifications = Rc::new(Cell::new(0));
        let counter = Rc::clone(&notifications);
        let listener = store.subscribe(move |_: &Value| counter.set(counter.get() + 1));
        Self {
            coordinator,
            store,
            tracker,
            notifications,
            _listener: listener,
        }
    }

    fn apply(&self, step: &Step) -> Result<()> {
        tracing::debug!(?step, "applying step");
        match step {
            Step::Set(value) => self.store.set(value.clone()),
            Step::Patch(fields) => self.store.update(|state| match state {
                Value::Object(map) => {
                    for (key, value) in fields {
                        map.insert(key.clone(), value.clone());
                    }
                }
                other => *other = Value::Object(fields.clone()),
            }),
            Step::Transaction(steps) => self
                .coordinator
                .try_run(|| steps.iter().try_for_each(|step| self.apply(step)))?,
            Step::Undo => {
                self.tracker.undo();
            }
            Step::Redo => {
                self.tracker.redo();
            }
            Step::Jump(steps) => {
                self.tracker.jump(*steps);
            }
            Step::JumpToPast(index) => self
                .tracker
                .jump_to_past(*index)
                .with_context(|| format!("Step jump_to_past({index}) failed"))?,
            Step::JumpToFuture(index) => self
                .tracker
                .jump_to_future(*index)
                .with_context(|| format!("Step jump_to_future({index}) failed"))?,
            Step::IgnoreNext => self.tracker.ignore_next(),
            Step::Clear => self.tracker.clear(),
        }
        Ok(())
    }

    fn report(&self) -> Report {
        Report {
            state: self.store.get_value(),
            notifications: self.notifications.get(),
            past: self.tracker.past(),
            future: self.tracker.future(),
        }
    }
}

/// Parses a script document.
///
/// # Errors
///
/// Returns an error if the text is not a JSON array of steps.
pub fn parse(text: &str) -> Result<Vec<Step>> {
    serde_json::from_str(text).context("Failed to parse script")
}

/// Replays `steps` and reports the final state and history.
///
/// With a `persist` target the saved history (if any) is restored before
/// the first step and the resulting history is saved afterwards. JSON
/// snapshots are stored in their string form.
///
/// # Errors
///
/// Returns an error if a step fails or persistence cannot be read or written.
pub fn replay(
    initial: Value,
    steps: &[Step],
    config: HistoryConfig,
    persist: Option<PersistTarget<'_>>,
) -> Result<Report> {
    let saved = match persist {
        Some(target) => load_history(target)?,
        None => None,
    };
    let session = Session::new(initial, config, saved);

    for (index, step) in steps.iter().enumerate() {
        session
            .apply(step)
            .with_context(|| format!("Script step {index} failed"))?;
    }

    if let Some(target) = persist {
        let encoded = session.tracker.snapshot().map(|value| value.to_string());
        target
            .persistence
            .save_state(target.key, &encoded)
            .with_context(|| format!("Failed to save history '{}'", target.key))?;
    }

    Ok(session.report())
}

fn load_history(target: PersistTarget<'_>) -> Result<Option<HistoryState<Value>>> {
    let saved: Option<HistoryState<String>> = target
        .persistence
        .load_state(target.key)
        .with_context(|| format!("Failed to load history '{}'", target.key))?;
    let Some(saved) = saved else {
        return Ok(None);
    };
    let history = saved
        .try_map(|text| serde_json::from_str::<Value>(&text))
        .context("Saved history is not valid JSON")?;
    tracing::info!(key = target.key, "restoring saved history");
    Ok(Some(history))
}
