//! Application configuration and cache layout.
//!
//! Configuration is a JSON file of the form `{"params": {"cache_dir": …}}`
//! in the per-OS user configuration directory. A missing or invalid file
//! never fails startup; defaults are used and the problem is logged.
//!
//! The disk cache has two tiers under `cache_dir`: `standard/` holds raw
//! downloaded documents and `model/` holds serialized specification models.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::error;

/// Default application name, used to derive per-OS directories.
pub const APP_NAME: &str = "dcmspec";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    params: IndexMap<String, serde_json::Value>,
}

/// Runtime configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    config_file: PathBuf,
    params: IndexMap<String, serde_json::Value>,
}

impl Config {
    /// Loads the configuration from the default per-OS location.
    pub fn new() -> Self {
        let config_file = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(APP_NAME)
            .join("config.json");
        Self::from_file(config_file)
    }

    /// Loads the configuration from a specific file.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file
    /// logs an error and also yields the defaults.
    pub fn from_file(config_file: impl Into<PathBuf>) -> Self {
        let config_file = config_file.into();
        let mut config = Config {
            config_file,
            params: IndexMap::new(),
        };
        let default_cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join(APP_NAME);
        config.params.insert(
            "cache_dir".to_string(),
            serde_json::Value::String(default_cache.to_string_lossy().into_owned()),
        );
        config.load();
        config
    }

    fn load(&mut self) {
        if !self.config_file.exists() {
            return;
        }
        let loaded = std::fs::read_to_string(&self.config_file)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<ConfigFile>(&text).map_err(|e| e.to_string())
            });
        match loaded {
            Ok(file) => self.params.extend(file.params),
            Err(e) => {
                error!(
                    file = %self.config_file.display(),
                    "failed to load configuration file: {e}"
                );
            }
        }
    }

    /// Path of the configuration file this instance was loaded from.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// The configured cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.params
            .get("cache_dir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".cache").join(APP_NAME))
    }

    /// Path of a raw document in the `standard/` cache tier.
    pub fn standard_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir().join("standard").join(file_name)
    }

    /// Path of a serialized model in the `model/` cache tier.
    pub fn model_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir().join("model").join(file_name)
    }

    /// Returns an arbitrary configuration parameter.
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Sets an arbitrary configuration parameter.
    pub fn set_param(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.params.insert(key.into(), value);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
