//! Configuration resolution for `DeviceHub`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/devicehub/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`DEVICEHUB_*`)
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete `DeviceHub` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub keys: KeyConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            keys: KeyConfig::default(),
            events: EventConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Device listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds a freshly accepted connection has to complete its handshake.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5683,
            handshake_timeout_secs: 30,
        }
    }
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// `SQLite` database file. Falls back to [`database_path`] when unset.
    pub database_path: Option<PathBuf>,
}

/// Key material locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// PEM private key of the server. The public key lives next to it with a
    /// `.pub.pem` extension.
    pub server_key_file: PathBuf,
    /// Directory holding per-device public keys.
    pub core_keys_dir: PathBuf,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            server_key_file: PathBuf::from("default_key.pem"),
            core_keys_dir: PathBuf::from("core_keys"),
        }
    }
}

/// Connectivity event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// TTL attached to published status events.
    pub ttl_secs: u32,
    /// Buffered events per subscriber before lagging subscribers drop events.
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            channel_capacity: 256,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        let file = load_config_file(path)?;
        merge_config(&mut config, file);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("devicehub").join("settings.json"))
}

/// Get the default database path.
pub fn database_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("devicehub").join("devices.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.server = overlay.server;

    if overlay.storage.database_path.is_some() {
        base.storage.database_path = overlay.storage.database_path;
    }

    base.keys = overlay.keys;
    base.events = overlay.events;
    base.log_level = overlay.log_level;
}

/// Apply `DEVICEHUB_*` overrides read through `lookup`.
///
/// Unparseable numeric values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("DEVICEHUB_HOST") {
        config.server.host = val;
    }
    if let Some(n) = lookup("DEVICEHUB_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = n;
    }
    if let Some(n) = lookup("DEVICEHUB_HANDSHAKE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.server.handshake_timeout_secs = n;
    }
    if let Some(val) = lookup("DEVICEHUB_DB_PATH") {
        config.storage.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("DEVICEHUB_SERVER_KEY_FILE") {
        config.keys.server_key_file = PathBuf::from(val);
    }
    if let Some(val) = lookup("DEVICEHUB_CORE_KEYS_DIR") {
        config.keys.core_keys_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("DEVICEHUB_LOG_LEVEL") {
        config.log_level = val;
    }
}
