//! Configuration system for the telemetry service
//!
//! Configuration is a single TOML file. Broker credentials are never stored in
//! the file itself; the `[mqtt]` section names the environment variables that
//! hold them and they are resolved when the connection is configured.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::dispatch::TopicPattern;

/// Main service configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub predictors: PredictorsSection,
    #[serde(default)]
    pub storage: StorageSection,
}

/// Service identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// MQTT connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Client identifier presented to the broker (defaults to the service id)
    pub client_id: Option<String>,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Protocol version; only "3.1.1" is supported
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long `connect` waits for the broker acknowledgment
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_qos")]
    pub default_qos: u8,
    #[serde(default)]
    pub default_retain: bool,
    /// Capacity of the request channel between the client handle and the network loop
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

fn default_clean_session() -> bool {
    true
}

fn default_protocol() -> String {
    SUPPORTED_PROTOCOL.to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_qos() -> u8 {
    1
}

fn default_channel_capacity() -> usize {
    64
}

/// The only MQTT protocol revision the transport speaks
pub const SUPPORTED_PROTOCOL: &str = "3.1.1";

/// TLS verification settings, applied only for `mqtts://` brokers
///
/// Both checks default to on. Turning either off is an explicit opt-in and
/// is logged at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// PEM bundle of trusted CA certificates; system roots are used when unset
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    #[serde(default = "default_true")]
    pub verify_hostname: bool,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            ca_file: None,
            verify_certificate: true,
            verify_hostname: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Reconnection backoff for the network loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_backoff")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
    /// Unset means retry forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff(),
            sustained_delay_ms: default_sustained_delay(),
            max_attempts: None,
        }
    }
}

fn default_backoff() -> Vec<u64> {
    vec![500, 1000, 2000, 5000]
}

fn default_sustained_delay() -> u64 {
    5000
}

/// Subscription layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    #[serde(default = "default_sensor_subscription")]
    pub sensor_subscription: String,
    /// QoS for the sensor subscription (falls back to `mqtt.default_qos`)
    pub sensor_qos: Option<u8>,
    /// Also subscribe panel data, cleaning status and alert topics
    #[serde(default)]
    pub auxiliary: bool,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            sensor_subscription: default_sensor_subscription(),
            sensor_qos: None,
            auxiliary: false,
        }
    }
}

fn default_sensor_subscription() -> String {
    crate::protocol::topics::SENSOR_SUBSCRIPTION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PredictorsSection {
    #[serde(default)]
    pub ml: PredictorEndpoint,
    #[serde(default)]
    pub dl: PredictorEndpoint,
}

/// Remote model server; no endpoint means the predictor is unavailable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictorEndpoint {
    pub endpoint: Option<String>,
    #[serde(default = "default_predictor_timeout")]
    pub timeout_ms: u64,
}

impl Default for PredictorEndpoint {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_predictor_timeout(),
        }
    }
}

fn default_predictor_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSection {
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    /// Base URL under which `images_dir` is served, if any
    pub public_image_base_url: Option<String>,
    /// Directory that local image file references must resolve into;
    /// local paths are refused when unset
    pub image_source_dir: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            records_dir: default_records_dir(),
            images_dir: default_images_dir(),
            public_image_base_url: None,
            image_source_dir: None,
        }
    }
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("data/records")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("data/images")
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id)?;
        self.mqtt.validate()?;

        if let Some(qos) = self.topics.sensor_qos {
            validate_qos("topics.sensor_qos", qos)?;
        }
        if TopicPattern::parse(&self.topics.sensor_subscription).is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "topics.sensor_subscription '{}' is not a valid topic filter",
                self.topics.sensor_subscription
            )));
        }

        for (name, predictor) in [("ml", &self.predictors.ml), ("dl", &self.predictors.dl)] {
            if predictor.timeout_ms == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "predictors.{name}.timeout_ms must be greater than 0"
                )));
            }
            if let Some(endpoint) = &predictor.endpoint {
                Url::parse(endpoint).map_err(|e| {
                    ConfigError::InvalidConfig(format!(
                        "predictors.{name}.endpoint '{endpoint}' is not a valid URL: {e}"
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Client identifier sent to the broker
    pub fn client_id(&self) -> String {
        self.mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| self.service.id.clone())
    }

    /// Effective QoS for the sensor subscription
    pub fn sensor_qos(&self) -> u8 {
        self.topics.sensor_qos.unwrap_or(self.mqtt.default_qos)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
id = "test-service"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl MqttSection {
    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.broker_url).map_err(|_| {
            ConfigError::InvalidConfig(format!("Invalid broker URL: {}", self.broker_url))
        })?;
        if !matches!(url.scheme(), "mqtt" | "mqtts") {
            return Err(ConfigError::InvalidConfig(format!(
                "Broker URL scheme must be mqtt or mqtts, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "Broker URL has no host: {}",
                self.broker_url
            )));
        }
        if self.protocol != SUPPORTED_PROTOCOL {
            return Err(ConfigError::InvalidConfig(format!(
                "Unsupported MQTT protocol '{}', only {SUPPORTED_PROTOCOL} is supported",
                self.protocol
            )));
        }
        validate_qos("mqtt.default_qos", self.default_qos)?;
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.sustained_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect.sustained_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect.max_attempts must be greater than 0 or unset for unlimited"
                    .to_string(),
            ));
        }
        if self.tls.verify_certificate && !self.tls.verify_hostname && self.tls.ca_file.is_none()
        {
            return Err(ConfigError::InvalidConfig(
                "mqtt.tls.verify_hostname = false requires mqtt.tls.ca_file".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the broker URL selects TLS
    pub fn uses_tls(&self) -> bool {
        Url::parse(&self.broker_url)
            .map(|url| url.scheme() == "mqtts")
            .unwrap_or(false)
    }

    /// Get MQTT username from environment variable
    pub fn username(&self) -> Option<String> {
        get_env_var_optional(self.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn password(&self) -> Option<String> {
        get_env_var_optional(self.password_env.as_ref())
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn validate_qos(field: &str, qos: u8) -> Result<(), ConfigError> {
    if qos > 2 {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be 0, 1 or 2, got {qos}"
        )));
    }
    Ok(())
}

fn validate_service_id(service_id: &str) -> Result<(), ConfigError> {
    let valid_chars = service_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if service_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServiceId(format!(
            "Service ID '{service_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
