/// Past/present/future stacks for one tracked key.
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

/// What happened to an observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The previous present moved to the past and the future was cleared.
    Recorded,
    /// Consumed by `ignore_next`; the stacks were left alone.
    Ignored,
    /// Equal to the present, e.g. the echo of an undo or redo.
    Unchanged,
}

/// Undo/redo stacks around a present value.
///
/// `past` runs oldest to newest and never holds more than `max_age`
/// entries. `future` runs from the next redo target outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryState<T> {
    past: VecDeque<T>,
    present: T,
    future: VecDeque<T>,
    skip_next: bool,
    max_age: usize,
}

impl<T> HistoryState<T> {
    /// Starts with `present` and empty stacks.
    pub fn new(present: T, max_age: usize) -> Self {
        Self {
            past: VecDeque::new(),
            present,
            future: VecDeque::new(),
            skip_next: false,
            max_age,
        }
    }

    pub fn present(&self) -> &T {
        &self.present
    }

    /// Past entries, oldest first.
    pub fn past(&self) -> &VecDeque<T> {
        &self.past
    }

    /// Future entries, next redo first.
    pub fn future(&self) -> &VecDeque<T> {
        &self.future
    }

    pub fn has_past(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn has_future(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn max_age(&self) -> usize {
        self.max_age
    }

    /// Whether the next observed change will be ignored.
    pub fn skip_next(&self) -> bool {
        self.skip_next
    }

    /// Changes the bound, evicting the oldest entries if needed.
    pub fn set_max_age(&mut self, max_age: usize) {
        self.max_age = max_age;
        self.trim_past();
    }

    /// Marks the next observed change as not worth a history step.
    pub fn ignore_next(&mut self) {
        self.skip_next = true;
    }

    /// Empties both stacks, keeping the present.
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    /// Steps back once. Returns `false` when there is no past.
    pub fn undo(&mut self) -> bool {
        match self.past.len() {
            0 => false,
            len => self.jump_to_past(len - 1).is_ok(),
        }
    }

    /// Steps forward once. Returns `false` when there is no future.
    pub fn redo(&mut self) -> bool {
        self.has_future() && self.jump_to_future(0).is_ok()
    }

    /// Moves `steps` back (negative) or forward (positive), clamped to
    /// the available depth. Returns whether the present changed.
    pub fn jump(&mut self, steps: isize) -> bool {
        let wanted = steps.unsigned_abs();
        if steps < 0 {
            let steps = wanted.min(self.past.len());
            steps > 0 && self.jump_to_past(self.past.len() - steps).is_ok()
        } else {
            let steps = wanted.min(self.future.len());
            steps > 0 && self.jump_to_future(steps - 1).is_ok()
        }
    }

    /// Makes `past[index]` the present in one move.
    ///
    /// Everything newer than the target, including the old present, moves
    /// to the future in order.
    pub fn jump_to_past(&mut self, index: usize) -> Result<(), HistoryError> {
        let len = self.past.len();
        if index >= len {
            return Err(HistoryError::InvalidIndex { index, len });
        }

        let mut newer = self.past.split_off(index);
        let Some(target) = newer.pop_front() else {
            return Err(HistoryError::InvalidIndex { index, len });
        };
        let previous = std::mem::replace(&mut self.present, target);
        self.future.push_front(previous);
        while let Some(entry) = newer.pop_back() {
            self.future.push_front(entry);
        }
        Ok(())
    }

    /// Makes `future[index]` the present in one move.
    ///
    /// The old present and every future entry before the target move to
    /// the past in order.
    pub fn jump_to_future(&mut self, index: usize) -> Result<(), HistoryError> {
        let len = self.future.len();
        if index >= len {
            return Err(HistoryError::InvalidIndex { index, len });
        }

        let rest = self.future.split_off(index + 1);
        let Some(target) = self.future.pop_back() else {
            return Err(HistoryError::InvalidIndex { index, len });
        };
        let skipped = std::mem::replace(&mut self.future, rest);
        let previous = std::mem::replace(&mut self.present, target);
        self.past.push_back(previous);
        self.past.extend(skipped);
        self.trim_past();
        Ok(())
    }

    /// Maps every entry to another type, keeping the stack layout.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> HistoryState<U> {
        HistoryState {
            past: self.past.into_iter().map(&mut f).collect(),
            present: f(self.present),
            future: self.future.into_iter().map(&mut f).collect(),
            skip_next: self.skip_next,
            max_age: self.max_age,
        }
    }

    /// Fallible [`HistoryState::map`]; stops at the first error.
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<HistoryState<U>, E> {
        Ok(HistoryState {
            past: self.past.into_iter().map(&mut f).collect::<Result<_, E>>()?,
            present: f(self.present)?,
            future: self
                .future
                .into_iter()
                .map(&mut f)
                .collect::<Result<_, E>>()?,
            skip_next: self.skip_next,
            max_age: self.max_age,
        })
    }

    fn trim_past(&mut self) {
        while self.past.len() > self.max_age {
            self.past.pop_front();
        }
    }
}

impl<T: PartialEq> HistoryState<T> {
    /// Feeds a newly observed value into the history.
    ///
    /// A value equal to the present is not a change and leaves a pending
    /// `ignore_next` armed. Otherwise a pending `ignore_next` swallows it,
    /// and failing that it becomes a new step.
    pub fn record(&mut self, value: T) -> Observation {
        if value == self.present {
            return Observation::Unchanged;
        }
        if self.skip_next {
            self.skip_next = false;
            self.present = value;
            return Observation::Ignored;
        }
        let previous = std::mem::replace(&mut self.present, value);
        self.past.push_back(previous);
        self.trim_past();
        self.future.clear();
        Observation::Recorded
    }
}
