//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default MQTT port when the URL does not carry one
const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported MQTT URL scheme in {0} (expected mqtt:// or tcp://)")]
    UnsupportedScheme(String),

    #[error("Invalid MQTT URL: {0}")]
    InvalidUrl(String),
}

/// Upstream MQTT connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL, e.g. `mqtt://localhost:1883`
    pub url: String,

    /// Topic carrying line protocol measurements
    pub topic: String,

    /// Client identifier (None = generated from the process id)
    pub client_id: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,

    pub keep_alive_secs: u64,

    /// Startup connect + subscribe deadline
    pub connect_timeout_ms: u64,

    /// Pause before polling again after a connection error
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: "mqtt://localhost:1883".to_string(),
            topic: "iot_center".to_string(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl MqttConfig {
    /// Split `url` into host and port
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        let rest = match self.url.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => rest,
            Some(_) => return Err(ConfigError::UnsupportedScheme(self.url.clone())),
            None => self.url.as_str(),
        };
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidUrl(self.url.clone()))?;
                (host, port)
            }
            None => (authority, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        Ok((host.to_string(), port))
    }
}

/// WebSocket listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub bind_addr: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Periodic sample publisher used to exercise the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub measurement: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 2000,
            measurement: "dummy".to_string(),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Topics relayed in addition to `mqtt.topic`
    pub extra_topics: Vec<String>,

    pub mqtt: MqttConfig,
    pub websocket: WebSocketConfig,
    pub producer: ProducerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            extra_topics: vec!["test".to_string()],
            mqtt: MqttConfig::default(),
            websocket: WebSocketConfig::default(),
            producer: ProducerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from `path` (or the default location), creating
    /// the file with defaults if it does not exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: RelayConfig = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            config.config_path = config_path;
            Ok(config)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save()
                .context("Failed to save default config")?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Apply `MQTT_URL`, `MQTT_TOPIC`, `MQTT_USERNAME`, `MQTT_PASSWORD` and
    /// `WS_BIND_ADDR` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("MQTT_URL") {
            self.mqtt.url = url;
        }
        if let Some(topic) = lookup("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(addr) = lookup("WS_BIND_ADDR") {
            self.websocket.bind_addr = addr;
        }
    }

    /// Every topic the relay subscribes to, main topic first, no duplicates
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![self.mqtt.topic.clone()];
        for topic in &self.extra_topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mqtt-relay")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mqtt(url: &str) -> MqttConfig {
        MqttConfig {
            url: url.to_string(),
            ..MqttConfig::default()
        }
    }

    #[test]
    fn test_host_port_parsing() {
        assert_eq!(mqtt("mqtt://localhost:1883").host_port(), Ok(("localhost".to_string(), 1883)));
        assert_eq!(mqtt("tcp://broker.local").host_port(), Ok(("broker.local".to_string(), 1883)));
        assert_eq!(mqtt("10.0.0.2:1884").host_port(), Ok(("10.0.0.2".to_string(), 1884)));
        assert_eq!(mqtt("mqtt://host:9000/").host_port(), Ok(("host".to_string(), 9000)));
    }

    #[test]
    fn test_host_port_errors() {
        assert!(matches!(mqtt("ws://host:80").host_port(), Err(ConfigError::UnsupportedScheme(_))));
        assert!(matches!(mqtt("mqtt://host:abc").host_port(), Err(ConfigError::InvalidUrl(_))));
        assert!(matches!(mqtt("mqtt://").host_port(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_topics_deduplicated() {
        let mut config = RelayConfig::default();
        assert_eq!(config.topics(), vec!["iot_center", "test"]);

        config.extra_topics = vec!["test".to_string(), "iot_center".to_string()];
        config.mqtt.topic = "test".to_string();
        assert_eq!(config.topics(), vec!["test", "iot_center"]);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("MQTT_URL", "mqtt://example:1999"),
            ("MQTT_TOPIC", "sensors"),
            ("MQTT_USERNAME", "relay"),
            ("WS_BIND_ADDR", ""),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.url, "mqtt://example:1999");
        assert_eq!(config.mqtt.topic, "sensors");
        assert_eq!(config.mqtt.username.as_deref(), Some("relay"));
        assert_eq!(config.mqtt.password, None);
        assert_eq!(config.websocket.bind_addr, "127.0.0.1:5000");
    }
}
