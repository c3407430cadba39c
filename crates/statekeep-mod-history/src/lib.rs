/// Undo/redo history for observable stores.
///
/// Provides a `HistoryTracker` that records snapshots of a store (or one
/// projected part of it) into a bounded past stack, and an
/// `EntityHistoryTracker` that keeps an isolated history per entity id.
/// Snapshots can be saved to an embedded key-value store (redb) on disk.
pub mod config;
pub mod entity;
pub mod error;
pub mod persistence;
pub mod projection;
pub mod state;
pub mod tracker;

pub use config::{EntityHistoryConfig, HistoryConfig};
pub use entity::{EntityHistoryTracker, EntitySelector};
pub use error::HistoryError;
pub use persistence::HistoryPersistence;
pub use projection::Projection;
pub use state::{HistoryState, Observation};
pub use tracker::{HistoryStatus, HistoryTracker};
