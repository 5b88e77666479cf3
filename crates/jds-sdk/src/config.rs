use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use jds_lock::LockConfig;
use jds_types::Document;

use crate::error::{StoreError, StoreResult};

/// Settings for one [`crate::Store`].
///
/// All fields have defaults, so a TOML file only needs the keys it changes:
///
/// ```toml
/// path = "/var/lib/app/settings.json"
/// write_debounce_ms = 25
///
/// [default_data]
/// theme = "light"
///
/// [lock]
/// timeout_ms = 2000
///
/// [watch]
/// force_polling = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing file. Required by [`crate::Store::open`].
    pub path: Option<PathBuf>,
    /// Document used when the backing file is absent and by `reset_to_default`.
    pub default_data: Document,
    pub read_debounce_ms: u64,
    pub write_debounce_ms: u64,
    /// Indent the backing file.
    pub pretty: bool,
    pub lock: LockConfig,
    pub watch: WatchConfig,
    /// Capacity of the notice broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_data: json!({}),
            read_debounce_ms: 0,
            write_debounce_ms: 10,
            pretty: true,
            lock: LockConfig::default(),
            watch: WatchConfig::default(),
            broadcast_capacity: 256,
        }
    }
}

impl StoreConfig {
    /// Defaults with the given backing file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_default_data(mut self, data: Document) -> Self {
        self.default_data = data;
        self
    }

    pub fn read_debounce(&self) -> Duration {
        Duration::from_millis(self.read_debounce_ms)
    }

    pub fn write_debounce(&self) -> Duration {
        Duration::from_millis(self.write_debounce_ms)
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

/// Settings for the external change watcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Quiet period that ends a burst of file notifications.
    pub debounce_ms: u64,
    /// Interval of the modification-time fallback.
    pub poll_interval_ms: u64,
    /// Skip native notifications and always poll.
    pub force_polling: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 50,
            poll_interval_ms: 500,
            force_polling: false,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
