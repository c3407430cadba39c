pub mod config;

pub use config::{AppConfig, HistorySettings, DEFAULT_LOG_FILTER, DEFAULT_MAX_AGE};
