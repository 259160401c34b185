//! Pure connection state management for the MQTT client
//!
//! Connection states, disconnect reasons, broker refusal diagnostics,
//! reconnect backoff and construction of the `rumqttc` options.

use super::tls;
use crate::config::{MqttSection, ReconnectSection};
use rumqttc::{ConnectReturnCode, MqttOptions};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Connection state of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Why the most recent connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed on request
    Clean,
    /// Network drop, broker close or acknowledgment timeout
    Unexpected(String),
    /// Broker refused the connect request
    Refused(ConnectFailure),
}

impl DisconnectReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("closed cleanly"),
            Self::Unexpected(detail) => write!(f, "connection lost: {detail}"),
            Self::Refused(failure) => write!(f, "refused by broker: {failure}"),
        }
    }
}

/// Broker refusal of a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    ProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Unknown(u8),
}

impl ConnectFailure {
    /// Map a CONNACK return code; 0 is success and maps to `None`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::ProtocolVersion),
            2 => Some(Self::IdentifierRejected),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadCredentials),
            5 => Some(Self::NotAuthorized),
            other => Some(Self::Unknown(other)),
        }
    }

    pub fn from_return_code(code: ConnectReturnCode) -> Option<Self> {
        match code {
            ConnectReturnCode::Success => None,
            ConnectReturnCode::RefusedProtocolVersion => Some(Self::ProtocolVersion),
            ConnectReturnCode::BadClientId => Some(Self::IdentifierRejected),
            ConnectReturnCode::ServiceUnavailable => Some(Self::ServerUnavailable),
            ConnectReturnCode::BadUserNamePassword => Some(Self::BadCredentials),
            ConnectReturnCode::NotAuthorized => Some(Self::NotAuthorized),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::ProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadCredentials => 4,
            Self::NotAuthorized => 5,
            Self::Unknown(code) => *code,
        }
    }

    /// Operator-facing explanation of the refusal
    pub fn diagnostic(&self) -> String {
        match self {
            Self::ProtocolVersion => {
                "broker rejected the MQTT protocol version (expected 3.1.1 support)".to_string()
            }
            Self::IdentifierRejected => {
                "broker rejected the client identifier; check mqtt.client_id".to_string()
            }
            Self::ServerUnavailable => "broker is unavailable, try again later".to_string(),
            Self::BadCredentials => {
                "bad username or password; check the credential environment variables".to_string()
            }
            Self::NotAuthorized => "client is not authorized to connect".to_string(),
            Self::Unknown(code) => format!("connection refused with unknown return code {code}"),
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.diagnostic(), self.code())
    }
}

/// Reconnection backoff for the network loop
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delay per attempt in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Total time spent waiting if every attempt fails; None when unlimited
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts
            .map(|max| (1..=max).map(|a| self.calculate_backoff_delay(a)).sum())
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
}

/// Build `rumqttc` options from configuration
///
/// Credentials are resolved from the environment here, so a rotated secret
/// takes effect on the next `connect`.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let tls_enabled = url.scheme() == "mqtts";
    let port = url.port().unwrap_or(if tls_enabled { 8883 } else { 1883 });

    if client_id.is_empty() {
        return Err(MqttError::ConnectionFailed(
            "client identifier must not be empty".to_string(),
        ));
    }

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(config.clean_session);

    if tls_enabled {
        if !config.tls.verify_certificate {
            warn!(broker = %config.broker_url, "TLS certificate verification is disabled");
        } else if !config.tls.verify_hostname {
            warn!(broker = %config.broker_url, "TLS hostname verification is disabled");
        }
        options.set_transport(tls::build_transport(&config.tls)?);
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        options.set_credentials(username, password);
    }

    Ok(options)
}
