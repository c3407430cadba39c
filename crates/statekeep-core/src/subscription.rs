// Listener registration handles.

/// Handle to a listener registered on a store.
///
/// Dropping the handle removes the listener. Use [`Subscription::detach`]
/// to keep the listener registered for the lifetime of the store.
pub struct Subscription {
    id: u64,
    release: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.release.is_some())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(id: u64, release: impl FnOnce() + 'static) -> Self {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    /// Returns the listener id, unique per store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener now.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    /// Leaves the listener registered until the store itself is dropped.
    pub fn detach(mut self) {
        self.release = None;
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_drop_runs_release_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let sub = Subscription::new(7, move || counter.set(counter.get() + 1));
        assert_eq!(sub.id(), 7);
        drop(sub);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_unsubscribe_releases() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let sub = Subscription::new(1, move || counter.set(counter.get() + 1));
        sub.unsubscribe();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_detach_skips_release() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let sub = Subscription::new(1, move || counter.set(counter.get() + 1));
        sub.detach();
        assert_eq!(calls.get(), 0);
    }
}
