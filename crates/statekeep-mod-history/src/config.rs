/// Configuration for history trackers.
use statekeep_config::{HistorySettings, DEFAULT_MAX_AGE};

/// Configuration for a whole-store [`crate::HistoryTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Max snapshots kept in the past stack. Oldest are evicted first.
    pub max_age: usize,
    /// Track only this property of a JSON object state.
    pub watch_property: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            watch_property: None,
        }
    }
}

impl HistoryConfig {
    pub fn with_max_age(mut self, max_age: usize) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_watch_property(mut self, property: impl Into<String>) -> Self {
        self.watch_property = Some(property.into());
        self
    }
}

impl From<&HistorySettings> for HistoryConfig {
    fn from(settings: &HistorySettings) -> Self {
        Self {
            max_age: settings.max_age,
            watch_property: settings.watch_property.clone(),
        }
    }
}

/// Configuration for an [`crate::EntityHistoryTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityHistoryConfig<K> {
    /// Max snapshots kept in each entity's past stack.
    pub max_age: usize,
    /// When set, only these ids are tracked; all others are ignored.
    pub entity_ids: Option<Vec<K>>,
}

impl<K> Default for EntityHistoryConfig<K> {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            entity_ids: None,
        }
    }
}

impl<K> EntityHistoryConfig<K> {
    pub fn with_max_age(mut self, max_age: usize) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_entity_ids(mut self, ids: impl IntoIterator<Item = K>) -> Self {
        self.entity_ids = Some(ids.into_iter().collect());
        self
    }
}

impl<K> From<&HistorySettings> for EntityHistoryConfig<K> {
    fn from(settings: &HistorySettings) -> Self {
        Self {
            max_age: settings.max_age,
            entity_ids: None,
        }
    }
}
