//! Application configuration.
//!
//! Loaded from a TOML file; every section and key is optional and falls
//! back to the defaults below. Filter configurations are carried as the
//! JSON strings the filter stages accept on reconfiguration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config_err;
use crate::error::{Error, Result};

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "PQGATE_CONFIG";

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pqgate.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub collaborators: CollaboratorConfig,
    pub broadcast: BroadcastConfig,
    pub filters: FilterConfigs,
}

impl AppConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Resolve the config path: explicit argument, then `PQGATE_CONFIG`,
    /// then `pqgate.toml`.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.qos > 2 {
            return Err(config_err!("mqtt.qos must be 0, 1 or 2, got {}", self.mqtt.qos));
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(config_err!("broadcast.queue_capacity must be positive"));
        }
        if self.collaborators.timeout_ms == 0 {
            return Err(config_err!("collaborators.timeout_ms must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// South MQTT connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Set to false to run without a south connection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Capacity of each per-asset worker queue
    #[serde(default = "default_worker_queue")]
    pub worker_queue: usize,

    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

fn default_true() -> bool {
    true
}
fn default_broker() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_qos() -> u8 {
    1
}
fn default_worker_queue() -> usize {
    256
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            enabled: true,
            broker: broker.into(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: 60,
            qos: 1,
            worker_queue: default_worker_queue(),
            subscriptions: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_subscription(mut self, topic: impl Into<String>, asset: impl Into<String>) -> Self {
        self.subscriptions.push(Subscription {
            topic: topic.into(),
            asset: Some(asset.into()),
        });
        self
    }
}

/// One MQTT subscription and the asset its frames belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    /// Asset name; when absent the topic's first path segment is used.
    #[serde(default)]
    pub asset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Base URL of the storage service used to seed the digital state cache.
    pub latest_reading_url: Option<String>,
    /// North ingest endpoint; readings are only logged when unset.
    pub ingest_url: Option<String>,
    /// Timeout for each collaborator request in milliseconds.
    pub timeout_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            latest_reading_url: None,
            ingest_url: None,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Bound on each subscriber send in milliseconds.
    pub send_timeout_ms: u64,
    /// Outbound queue capacity per subscriber.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 1000,
            queue_capacity: 64,
        }
    }
}

/// Initial filter configurations as JSON strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfigs {
    pub calibration: Option<String>,
    pub limits: Option<String>,
    pub digital: Option<String>,
}
