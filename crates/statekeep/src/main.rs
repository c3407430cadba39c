mod script;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use statekeep_config::AppConfig;
use statekeep_mod_history::{HistoryConfig, HistoryPersistence};

use crate::script::PersistTarget;

/// Replays store operations against a transaction-batched store with
/// undo/redo history and prints the outcome as JSON.
#[derive(Parser, Debug)]
#[command(name = "statekeep", version, about)]
struct Cli {
    /// JSON array of steps to replay.
    script: PathBuf,

    /// Initial store state as JSON. Defaults to `{}`.
    #[arg(long)]
    initial: Option<String>,

    /// Override the history bound from the config file.
    #[arg(long = "max-age")]
    max_age: Option<usize>,

    /// Track a single top-level property instead of the whole state.
    #[arg(long = "watch-property")]
    watch_property: Option<String>,

    /// Config file to use instead of `statekeep.json` next to the binary.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Restore history saved under this key, then save it back on exit.
    #[arg(long)]
    persist: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::config_path);
    let config = AppConfig::load_or_create(&config_path);

    // Initialize logging; RUST_LOG wins over the configured filter
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(config = %config_path.display(), "Starting statekeep");

    let history = history_config(&config, &cli);

    let text = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("Failed to read script: {}", cli.script.display()))?;
    let steps = script::parse(&text)?;

    let initial: Value = match &cli.initial {
        Some(raw) => serde_json::from_str(raw).context("Invalid --initial JSON")?,
        None => Value::Object(serde_json::Map::new()),
    };

    let persistence = match &cli.persist {
        Some(_) => Some(HistoryPersistence::open(&config.resolve_data_dir())?),
        None => None,
    };
    let target = persistence
        .as_deref()
        .zip(cli.persist.as_deref())
        .map(|(persistence, key)| PersistTarget { persistence, key });

    let report = script::replay(initial, &steps, history, target)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Config file settings with command-line overrides applied.
fn history_config(config: &AppConfig, cli: &Cli) -> HistoryConfig {
    let mut history = HistoryConfig::from(&config.history);
    if let Some(max_age) = cli.max_age {
        history.max_age = max_age.max(1);
    }
    if let Some(property) = &cli.watch_property {
        history.watch_property = Some(property.clone());
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "statekeep",
            "script.json",
            "--max-age",
            "0",
            "--watch-property",
            "filter",
        ]);
        let history = history_config(&AppConfig::default(), &cli);
        assert_eq!(history.max_age, 1);
        assert_eq!(history.watch_property.as_deref(), Some("filter"));
    }

    #[test]
    fn test_config_used_without_overrides() {
        let mut config = AppConfig::default();
        config.history.max_age = 4;
        let cli = Cli::parse_from(["statekeep", "script.json"]);
        let history = history_config(&config, &cli);
        assert_eq!(history.max_age, 4);
        assert!(history.watch_property.is_none());
    }
}
