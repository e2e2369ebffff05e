//! Node configuration.
//!
//! A configuration is either a single `.json`/`.toml` file or a directory of
//! them. Directory entries are read in path order and deep-merged: objects
//! merge key by key, arrays concatenate, and any other value is overwritten
//! by the later file.

use actornet_common::transport::TransportConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;

/// Default node listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3563";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub transport: TransportConfig,
    pub log: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            transport: TransportConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads a configuration file or directory.
    ///
    /// # Arguments
    ///
    /// * `path` - A `.json`/`.toml` file, or a directory holding such files
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be read, a file has an
    /// unsupported extension, a file fails to parse, or a directory holds
    /// no configuration files.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let value = if path.is_dir() {
            load_dir(path)?
        } else {
            load_file(path)?
        };

        serde_json::from_value(value).with_context(|| format!("invalid configuration in {}", path.display()))
    }
}

fn load_file(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    match extension(path) {
        Some("json") => serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display())),
        Some("toml") => {
            let table: toml::Table =
                toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
            serde_json::to_value(table).with_context(|| format!("failed to convert {}", path.display()))
        }
        _ => bail!("unsupported configuration file: {}", path.display()),
    }
}

fn load_dir(dir: &Path) -> Result<Value> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && matches!(extension(path), Some("json" | "toml")))
        .collect();
    files.sort();

    if files.is_empty() {
        bail!("no configuration files in {}", dir.display());
    }

    let mut merged = Value::Object(Default::default());
    for file in &files {
        tracing::debug!(file = %file.display(), "merging configuration file");
        merge(&mut merged, load_file(file)?);
    }
    Ok(merged)
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Deep-merges `overlay` into `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay),
        (base, overlay) => *base = overlay,
    }
}
