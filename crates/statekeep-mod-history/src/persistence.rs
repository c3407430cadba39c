/// Disk persistence for history snapshots, backed by redb.
///
/// Uses a single redb database file with one table:
/// - `history_state`: bincode-serialized snapshots keyed by a caller-chosen
///   string (a store name, or `"{scope}#{id}"` for entity histories)
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::state::HistoryState;

/// Snapshot table: key → bincode-serialized history.
const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("history_state");

/// Formats the key for one entity history within a scope.
pub fn entity_key(scope: &str, id: &impl std::fmt::Display) -> String {
    format!("{scope}#{id}")
}

/// Persistence layer for history snapshots backed by redb.
///
/// Values must round-trip through bincode, which cannot decode
/// self-describing types such as `serde_json::Value`; map those to a
/// string form first with [`HistoryState::map`].
pub struct HistoryPersistence {
    db: Database,
}

impl std::fmt::Debug for HistoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryPersistence").finish()
    }
}

impl HistoryPersistence {
    /// Opens or creates the history database in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("history.redb");
        let db = Database::create(&db_path)
            .with_context(|| format!("Failed to open history database: {}", db_path.display()))?;

        // Ensure the table exists
        let write_txn = db
            .begin_write()
            .context("Failed to begin initial write transaction")?;
        {
            let _ = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to create history_state table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initial transaction")?;

        tracing::debug!("Opened history database at {}", db_path.display());
        Ok(Arc::new(Self { db }))
    }

    /// Saves one history under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write transaction fails.
    pub fn save_state<T: Serialize>(&self, key: &str, state: &HistoryState<T>) -> Result<()> {
        self.write(key, state)
    }

    /// Loads the history stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn load_state<T: DeserializeOwned>(&self, key: &str) -> Result<Option<HistoryState<T>>> {
        self.read(key)
    }

    /// Saves a whole set of entity histories under one key.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write transaction fails.
    pub fn save_entity_states<K, T>(
        &self,
        key: &str,
        states: &BTreeMap<K, HistoryState<T>>,
    ) -> Result<()>
    where
        K: Serialize,
        T: Serialize,
    {
        self.write(key, states)
    }

    /// Loads a set of entity histories saved with
    /// [`HistoryPersistence::save_entity_states`].
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn load_entity_states<K, T>(
        &self,
        key: &str,
    ) -> Result<Option<BTreeMap<K, HistoryState<T>>>>
    where
        K: DeserializeOwned + Ord,
        T: DeserializeOwned,
    {
        self.read(key)
    }

    /// Removes the value under `key`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn delete_state(&self, key: &str) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let existed = {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to open history_state table")?;
            let removed = table
                .remove(key)
                .context("Failed to remove history state")?;
            removed.is_some()
        };
        write_txn.commit().context("Failed to commit deletion")?;
        Ok(existed)
    }

    /// Lists all stored keys in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn list_keys(&self) -> Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(STATE_TABLE)
            .context("Failed to open history_state table")?;

        let mut keys = Vec::new();
        for entry in table.iter().context("Failed to iterate history_state table")? {
            let (key, _) = entry.context("Failed to read history_state entry")?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn write<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<()> {
        let bytes = bincode::serialize(value).context("Failed to serialize history state")?;

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to open history_state table")?;
            table
                .insert(key, bytes.as_slice())
                .context("Failed to insert history state")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")?;
        tracing::trace!(key, bytes = bytes.len(), "history state saved");
        Ok(())
    }

    fn read<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(STATE_TABLE)
            .context("Failed to open history_state table")?;

        match table.get(key).context("Failed to read history state")? {
            Some(guard) => {
                let value = bincode::deserialize(guard.value())
                    .context("Failed to deserialize history state")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> HistoryState<String> {
        let mut state = HistoryState::new("a".to_string(), 10);
        state.record("b".to_string());
        state.record("c".to_string());
        state.undo();
        state
    }

    #[test]
    fn test_save_and_load_state() {
        let dir = TempDir::new().expect("create temp dir");
        let pl = HistoryPersistence::open(dir.path()).expect("open db");

        pl.save_state("todos", &sample()).expect("save");
        let loaded: HistoryState<String> =
            pl.load_state("todos").expect("load").expect("present");

        assert_eq!(loaded, sample());
    }

    #[test]
    fn test_load_missing_key() {
        let dir = TempDir::new().expect("create temp dir");
        let pl = HistoryPersistence::open(dir.path()).expect("open db");
        let loaded: Option<HistoryState<String>> = pl.load_state("nope").expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().expect("create temp dir");
        let pl = HistoryPersistence::open(dir.path()).expect("open db");

        pl.save_state("k", &HistoryState::new(1u32, 5)).expect("save");
        pl.save_state("k", &HistoryState::new(2u32, 5)).expect("save");

        let loaded: HistoryState<u32> = pl.load_state("k").expect("load").expect("present");
        assert_eq!(*loaded.present(), 2);
        assert_eq!(pl.list_keys().expect("keys"), vec!["k".to_string()]);
    }

    #[test]
    fn test_delete_and_list() {
        let dir = TempDir::new().expect("create temp dir");
        let pl = HistoryPersistence::open(dir.path()).expect("open db");

        pl.save_state("b", &sample()).expect("save");
        pl.save_state("a", &sample()).expect("save");
        assert_eq!(pl.list_keys().expect("keys"), vec!["a", "b"]);

        assert!(pl.delete_state("a").expect("delete"));
        assert!(!pl.delete_state("a").expect("delete again"));
        assert_eq!(pl.list_keys().expect("keys"), vec!["b"]);
    }

    #[test]
    fn test_entity_states_round_trip() {
        let dir = TempDir::new().expect("create temp dir");
        let pl = HistoryPersistence::open(dir.path()).expect("open db");

        let mut states = BTreeMap::new();
        states.insert(1u32, HistoryState::new(Some("x".to_string()), 3));
        states.insert(2u32, HistoryState::new(None, 3));
        pl.save_entity_states("todos", &states).expect("save");

        let loaded: BTreeMap<u32, HistoryState<Option<String>>> = pl
            .load_entity_states("todos")
            .expect("load")
            .expect("present");
        assert_eq!(loaded, states);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().expect("create temp dir");
        {
            let pl = HistoryPersistence::open(dir.path()).expect("open db");
            pl.save_state("todos", &sample()).expect("save");
        }
        let pl = HistoryPersistence::open(dir.path()).expect("reopen db");
        let loaded: Option<HistoryState<String>> = pl.load_state("todos").expect("load");
        assert_eq!(loaded, Some(sample()));
    }

    #[test]
    fn test_entity_key_format() {
        assert_eq!(entity_key("todos", &42), "todos#42");
    }
}
