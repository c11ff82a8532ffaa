//! Run files and config resolution for `autocart start`.
//!
//! Precedence, lowest first: built-in defaults, stored settings, the run
//! file's `config` object, command line flags.

use crate::settings::Settings;
use anyhow::{Context, Result};
use autocart::{AutomationConfig, TargetSet};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// `{ "config": {...}, "targets": {...} }`; `config` may be partial
#[derive(Debug, Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub config: Map<String, Value>,
    pub targets: TargetSet,
}

impl RunFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        let run: RunFile = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid run file {}", path.display()))?;
        Ok(run)
    }
}

/// Config fields given on the command line
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub step_delay_ms: Option<u64>,
    pub max_items_per_category: Option<usize>,
    pub max_scrolls: Option<u32>,
}

impl ConfigOverrides {
    fn apply(&self, fields: &mut Map<String, Value>) {
        if let Some(v) = self.step_delay_ms {
            fields.insert("stepDelayMs".into(), v.into());
        }
        if let Some(v) = self.max_items_per_category {
            fields.insert("maxItemsPerCategory".into(), v.into());
        }
        if let Some(v) = self.max_scrolls {
            fields.insert("maxScrolls".into(), v.into());
        }
    }
}

pub fn resolve_config(
    settings: Option<&Settings>,
    file: &Map<String, Value>,
    overrides: &ConfigOverrides,
) -> Result<AutomationConfig> {
    let mut fields = match serde_json::to_value(AutomationConfig::default())? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    if let Some(settings) = settings {
        fields.extend(settings.values().clone());
    }
    fields.extend(file.clone());
    overrides.apply(&mut fields);

    let config: AutomationConfig = serde_json::from_value(Value::Object(fields))
        .context("Configuration does not match the expected fields")?;
    config.validate()?;
    Ok(config)
}
