//! File-backed configuration, merged with defaults on load and persisted on
//! every `set` (spec.md's configuration surface; grounded on `queuectl/config.py`'s
//! `Config` class — read-merge-write against a JSON file under the user's
//! home directory, defaults filled in for anything the file omits).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relayq_core::config::EngineConfig;
use serde_json::Value;

/// Keys a caller may pass to `config set`, and how to coerce the string
/// value clap hands us before it's stored.
pub fn coerce(key: &str, raw: &str) -> Result<Value> {
    match key {
        "max_retries" | "default_timeout" | "worker_poll_interval" => raw
            .parse::<i64>()
            .map(Value::from)
            .with_context(|| format!("'{key}' must be an integer")),
        "backoff_base" => raw
            .parse::<f64>()
            .map(Value::from)
            .with_context(|| format!("'{key}' must be a number")),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// CLI-facing key spelling (`max-retries`) to the config field it maps to
/// (`max_retries`).
pub fn normalize_key(cli_key: &str) -> String {
    cli_key.replace('-', "_")
}

pub struct ConfigStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl ConfigStore {
    /// Default location: `~/.relayq/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs_home()?;
        Ok(home.join(".relayq").join("config.json"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let defaults = default_values();

        let mut values = defaults;
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            if let Ok(Value::Object(file_values)) = serde_json::from_str::<Value>(&raw) {
                for (key, value) in file_values {
                    values.insert(key, value);
                }
            }
            // A malformed file falls back silently to defaults, matching the
            // original behaviour of tolerating a corrupt config rather than
            // refusing to start.
        }

        Ok(Self { path, values })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing config file {}", self.path.display()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<()> {
        self.values.insert(key.into(), value);
        self.save()
    }

    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Materialize the typed engine configuration, validating as we go.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let as_value = Value::Object(self.values.clone().into_iter().collect());
        serde_json::from_value(as_value).context("config file has an invalid value for a known key")
    }
}

fn default_values() -> BTreeMap<String, Value> {
    let defaults = EngineConfig::default();
    match serde_json::to_value(defaults) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

fn dirs_home() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME environment variable is not set")
}
