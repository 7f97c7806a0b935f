use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::protocol::TransportHint;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// TCP socket the command layer talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

/// Link to the separate relay process that turns a live channel into a
/// playable URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_address")]
    pub address: String,
    #[serde(default)]
    pub transport: TransportHint,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// How long a requested channel may stay pending before the daemon gives
    /// up on it.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Minimum number of distinct songs before a random playlist may start.
    #[serde(default = "default_playlist_threshold")]
    pub playlist_threshold: usize,
    /// Leave voice after this long without anything to play.
    #[serde(default = "default_idle_disconnect_secs")]
    pub idle_disconnect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_toml")]
    pub catalog_toml: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_control_port(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_relay_address(),
            transport: TransportHint::default(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            playlist_threshold: default_playlist_threshold(),
            idle_disconnect_secs: default_idle_disconnect_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_toml: default_catalog_toml(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_relay_address() -> String {
    platform::relay_address()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_start_timeout_secs() -> u64 {
    30
}

fn default_volume() -> f32 {
    0.25
}

fn default_playlist_threshold() -> usize {
    40
}

fn default_idle_disconnect_secs() -> u64 {
    60
}

fn default_catalog_toml() -> PathBuf {
    platform::config_dir().join("catalog.toml")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
