//! MQTT 3.1.1 connection manager
//!
//! Pure functions are kept apart from the I/O so the decision logic can be
//! tested without a broker:
//!
//! - [`connection`] - states, disconnect reasons, refusal diagnostics, options
//! - [`tls`] - rustls configuration for `mqtts://` brokers
//! - [`message_handler`] - routing of polled events
//! - [`health_monitor`] - state transitions and reconnect decisions
//! - [`client`] - the connection manager and its network loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use solar_telemetry::config::ServiceConfig;
//! use solar_telemetry::transport::mqtt::MqttClient;
//! use solar_telemetry::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = ServiceConfig::load_from_file("solar-telemetry.toml".as_ref())?;
//! let client = MqttClient::from_config(&config);
//! if !client.connect().await {
//!     eprintln!("broker unreachable: {:?}", client.last_disconnect());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod tls;

pub use client::MqttClient;
pub use connection::{
    ConnectFailure, ConnectionState, DisconnectReason, MqttError, ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
