//! # Bridge Configuration
//!
//! Loaded once at startup from a TOML file. Every field has a default so a
//! missing file or a partial one still yields a usable configuration.
//!
//! ```toml
//! namespace = "homething"
//! command_timeout_secs = 10
//! profile_format = "cbor"
//!
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//! ```
//!
//! `HTBRIDGE_HOST` and `HTBRIDGE_PORT` override the broker address.

use crate::codec::ProfileWireFormat;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const CONFIG_DIR: &str = "htbridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// Process id is appended to keep concurrent bridges apart
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
    /// Capacity of the client request queue
    pub request_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id_prefix: "htbridge".to_string(),
            keep_alive_secs: 30,
            request_capacity: 100,
        }
    }
}

impl MqttSettings {
    pub fn client_id(&self) -> String {
        format!("{}-{}", self.client_id_prefix, std::process::id())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttSettings,
    /// First topic level of every device topic
    pub namespace: String,
    /// First topic level of the third-party discovery integration
    pub discovery_prefix: String,
    pub command_timeout_secs: u64,
    /// How long a removal keeps listening for retained discovery topics
    pub discovery_grace_secs: u64,
    pub profile_format: ProfileWireFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttSettings::default(),
            namespace: "homething".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            command_timeout_secs: 10,
            discovery_grace_secs: 10,
            profile_format: ProfileWireFormat::default(),
        }
    }
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn discovery_grace(&self) -> Duration {
        Duration::from_secs(self.discovery_grace_secs)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse bridge config: {}", e))
    }

    /// Loads the configuration, falling back to defaults when the file does
    /// not exist. A file that exists but does not parse is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                warn!("No config directory available, using default configuration");
                return Ok(Self::default().with_env_overrides());
            }
        };

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?;
        let config = if exists {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
            info!("Loaded configuration from {}", path.display());
            Self::from_toml(&content)?
        } else {
            warn!("Config file {} does not exist, using defaults", path.display());
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("HTBRIDGE_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("HTBRIDGE_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(e) => warn!("Ignoring invalid HTBRIDGE_PORT {}: {}", port, e),
            }
        }
        self
    }
}
