//! Persistent key/value settings, stored as a flat JSON object.

use anyhow::{Context, Result};
use autocart::AutomationConfig;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Settings {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Settings {
    /// `<config dir>/autocart/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("autocart").join("settings.json"))
    }

    /// Load from `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Settings file {} is not a JSON object", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Remember every field of a config that was accepted by the engine
    pub fn remember(&mut self, config: &AutomationConfig) -> Result<()> {
        if let Value::Object(fields) = serde_json::to_value(config)? {
            for (key, value) in fields {
                self.values.insert(key, value);
            }
        }
        // an unset maxScrolls is skipped on serialize; forget any old value
        if config.max_scrolls.is_none() {
            self.values.remove("maxScrolls");
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_file_is_empty_and_save_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::load(&path).unwrap();
        assert!(settings.values().is_empty());

        settings.set("stepDelayMs", json!(250));
        settings.save().unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.get("stepDelayMs"), Some(&json!(250)));
    }

    #[test]
    fn remember_stores_config_fields_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::load(&path).unwrap();
        settings.set("maxScrolls", json!(4));

        let config = AutomationConfig {
            step_delay_ms: 300,
            max_items_per_category: 2,
            ..AutomationConfig::default()
        };
        settings.remember(&config).unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.get("stepDelayMs"), Some(&json!(300)));
        assert_eq!(reloaded.get("maxItemsPerCategory"), Some(&json!(2)));
        assert_eq!(reloaded.get("pollIntervalMs"), Some(&json!(100)));
        assert!(reloaded.get("maxScrolls").is_none());
    }

    #[test]
    fn non_object_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
