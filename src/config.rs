use crate::module::MAX_CELLS;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "bms-sim";
pub const DEFAULT_MODULES: usize = 12;
pub const DEFAULT_CELLS: usize = 12;
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
// rumqttc refuses shorter keep-alive periods
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Broker and fleet settings, read from `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulatorConfig {
    pub mqtt_server: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_modules")]
    pub num_modules: usize,
    #[serde(default = "default_cells")]
    pub num_cells: usize,
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_modules() -> usize {
    DEFAULT_MODULES
}

fn default_cells() -> usize {
    DEFAULT_CELLS
}

fn default_publish_interval_secs() -> u64 {
    DEFAULT_PUBLISH_INTERVAL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mqtt_server: "localhost".to_string(),
            mqtt_port: DEFAULT_MQTT_PORT,
            client_id: default_client_id(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            num_modules: DEFAULT_MODULES,
            num_cells: DEFAULT_CELLS,
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            log_level: default_log_level(),
        }
    }
}

impl SimulatorConfig {
    /// Reads `config.yaml`. Call [`SimulatorConfig::validate`] once command line
    /// overrides have been applied.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            origin: "inline yaml".to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt_server.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt_server must not be empty".to_string()));
        }
        if self.num_modules == 0 {
            return Err(ConfigError::Invalid("num_modules must be at least 1".to_string()));
        }
        if !(1..=MAX_CELLS).contains(&self.num_cells) {
            return Err(ConfigError::Invalid(format!(
                "num_cells must be within 1..={MAX_CELLS}, got {}",
                self.num_cells
            )));
        }
        if self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "publish_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::Invalid(format!(
                "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Broker login, read from `credentials.yaml`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read(path)?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Like [`Credentials::load`], but a missing file means an anonymous login.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
