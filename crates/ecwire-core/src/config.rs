//! Configuration resolution for ecwire.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/ecwire/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`ECWIRE_*`)
//! 5. CLI arguments (applied by the binary, highest priority)
//!
//! Files may be partial; each layer only overrides the keys it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ecwire_crypto::{FileKeyStore, KeySchedule};

use crate::channel::DEFAULT_MAX_FRAME_LEN;
use crate::error::{Error, Result};
use crate::handshake::HandshakeSettings;
use crate::server::DEFAULT_MAX_CONNECTIONS;

/// Complete ecwire configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the server listens and the client connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub addr: String,
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5555".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Framing and timing for established channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    pub max_frame_bytes: usize,
    /// Seconds allowed for the key exchange. 0 disables the bound.
    pub handshake_timeout_secs: u64,
    /// Seconds a server session may sit without a frame. 0 disables it.
    pub idle_timeout_secs: u64,
    pub key_schedule: KeySchedule,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_LEN,
            handshake_timeout_secs: 10,
            idle_timeout_secs: 300,
            key_schedule: KeySchedule::default(),
        }
    }
}

/// Optional on-disk key material.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct KeysConfig {
    /// Directory for persisted keys. Defaults to the working directory.
    pub dir: Option<PathBuf>,
    pub persist_keys: bool,
    pub export_session_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check cross-field constraints after all layers are applied.
    pub fn validate(&self) -> Result<()> {
        if self.network.addr.trim().is_empty() {
            return Err(Error::Config("network.addr must not be empty".into()));
        }
        if self.network.max_connections == 0 {
            return Err(Error::Config("network.max_connections must be at least 1".into()));
        }
        if self.channel.max_frame_bytes < ecwire_crypto::FRAME_OVERHEAD {
            return Err(Error::Config(format!(
                "channel.max_frame_bytes must be at least {}",
                ecwire_crypto::FRAME_OVERHEAD
            )));
        }
        if u32::try_from(self.channel.max_frame_bytes).is_err() {
            return Err(Error::Config("channel.max_frame_bytes exceeds u32".into()));
        }
        Ok(())
    }

    /// Handshake settings derived from this config.
    ///
    /// A key store is attached only when something will be written to it.
    pub fn handshake_settings(&self) -> HandshakeSettings {
        let wants_store = self.keys.persist_keys || self.keys.export_session_key;
        let key_store = wants_store.then(|| {
            let dir = self.keys.dir.clone().unwrap_or_else(|| PathBuf::from("."));
            Arc::new(FileKeyStore::new(dir)) as Arc<dyn ecwire_crypto::KeyStore>
        });
        HandshakeSettings {
            key_schedule: self.channel.key_schedule,
            max_frame_len: self.channel.max_frame_bytes,
            timeout: secs_to_timeout(self.channel.handshake_timeout_secs),
            key_store,
            persist_keys: self.keys.persist_keys,
            export_session_key: self.keys.export_session_key,
        }
    }

    /// Idle bound for server sessions, if any.
    pub fn idle_timeout(&self) -> Option<Duration> {
        secs_to_timeout(self.channel.idle_timeout_secs)
    }
}

fn secs_to_timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load configuration with hierarchical resolution from the real
/// environment.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    load_config_from(global_config_path().as_deref(), explicit, |key| {
        std::env::var(key).ok()
    })
}

/// Layered load with every source injectable.
///
/// A missing global file is skipped. A missing explicit file is an error.
pub fn load_config_from<F>(global: Option<&Path>, explicit: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global.filter(|p| p.exists()) {
        merge_json(&mut merged, load_config_file(path)?);
    }
    if let Some(path) = explicit {
        merge_json(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ecwire").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overlay `overlay` onto `base`, recursing into objects.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = env("ECWIRE_ADDR") {
        config.network.addr = val;
    }
    if let Some(val) = env("ECWIRE_MAX_CONNECTIONS") {
        config.network.max_connections = parse_env("ECWIRE_MAX_CONNECTIONS", &val)?;
    }
    if let Some(val) = env("ECWIRE_HANDSHAKE_TIMEOUT_SECS") {
        config.channel.handshake_timeout_secs = parse_env("ECWIRE_HANDSHAKE_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = env("ECWIRE_KEY_SCHEDULE") {
        config.channel.key_schedule =
            serde_json::from_value(serde_json::Value::String(val.clone())).map_err(|_| {
                Error::Config(format!(
                    "ECWIRE_KEY_SCHEDULE must be \"directional\" or \"shared\", got {val:?}"
                ))
            })?;
    }
    if let Some(val) = env("ECWIRE_KEY_DIR") {
        config.keys.dir = Some(PathBuf::from(val));
    }
    if let Some(val) = env("ECWIRE_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = env("ECWIRE_LOG_JSON") {
        config.logging.json = parse_env("ECWIRE_LOG_JSON", &val)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} has invalid value {val:?}")))
}
