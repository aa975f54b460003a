//! Modular configuration loader.
//!
//! Loads and merges configuration from:
//! - `config.json` - Core configuration
//! - `secrets.json` - Credentials (premium data tokens)
//! - `screener.json` - Screening thresholds and data sources
//!
//! Files are read from `~/.marketscan/` unless a directory is given.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;

/// Configuration file names
pub const CONFIG_FILES: &[&str] = &["config.json", "secrets.json", "screener.json"];

/// Load a JSON file. Returns None if the file doesn't exist.
fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
pub fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge_json(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Merge `section` into `config[key]`.
fn merge_section(config: &mut Value, key: &str, section: Value) {
    if let Some(config_obj) = config.as_object_mut() {
        match config_obj.get_mut(key) {
            Some(existing) => merge_json(existing, section),
            None => {
                config_obj.insert(key.to_string(), section);
            }
        }
    }
}

/// Load modular configuration from the config directory.
///
/// Priority (lowest to highest):
/// 1. config.json
/// 2. secrets.json (under `secrets`), screener.json (under `screener`)
/// 3. Environment variables (applied separately)
pub fn load_modular_config(dir: Option<PathBuf>) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    tracing::debug!("Loading modular config from {}", cfg_dir.display());

    let mut config = load_json_file(&cfg_dir.join("config.json"))?
        .unwrap_or(Value::Object(Default::default()));

    if let Some(secrets) = load_json_file(&cfg_dir.join("secrets.json"))? {
        merge_section(&mut config, "secrets", secrets);
        tracing::debug!("Loaded secrets.json");
    }

    if let Some(screener) = load_json_file(&cfg_dir.join("screener.json"))? {
        // Drop meta fields such as $schema
        let screener = match screener {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(key, _)| !key.starts_with('$') && !key.starts_with('_'))
                    .collect(),
            ),
            other => other,
        };
        merge_section(&mut config, "screener", screener);
        tracing::debug!("Loaded screener.json");
    }

    Ok(config)
}

/// Check which modular config files exist.
pub fn check_modular_files(dir: Option<PathBuf>) -> Vec<(String, bool)> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    CONFIG_FILES
        .iter()
        .map(|file| (file.to_string(), cfg_dir.join(file).exists()))
        .collect()
}
