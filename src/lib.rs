//! Solar panel telemetry ingestion
//!
//! Receives sensor readings from field devices over MQTT, routes them by
//! topic pattern, runs a two-stage soiling classifier (a fast tabular model
//! gated by an image model) and persists the enriched record.
//!
//! # Overview
//!
//! - [`transport`] - MQTT connection manager with reconnection and TLS
//! - [`dispatch`] - subscription registry and wildcard topic matching
//! - [`inference`] - feature derivation, predictors and the ingestion pipeline
//! - [`storage`] - image and record store collaborators
//! - [`command`] - outbound device commands
//! - [`service`] - lifecycle gluing the above together
//!
//! # Quick Start
//!
//! ```rust
//! use solar_telemetry::dispatch::matches;
//! use solar_telemetry::inference::FeatureVector;
//! use solar_telemetry::protocol::{panel_id_from_topic, Payload, SensorReading};
//!
//! assert!(matches("solar/panel/panel1/data", "solar/panel/+/data"));
//! assert!(matches("solar/panel/panel1/data/extra", "solar/panel/#"));
//!
//! let payload = Payload::decode(
//!     br#"{"temperature": 31.5, "humidity": 40, "light": 820, "R": 142, "G": 136, "B": 125}"#,
//! );
//! let reading = SensorReading::from_object(payload.as_object().unwrap()).unwrap();
//! let features = FeatureVector::from_reading(&reading);
//!
//! assert!((features.rgb_mean() - 134.333).abs() < 1e-3);
//! assert_eq!(panel_id_from_topic("solar/panel/panel1/data"), "panel1");
//! ```

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod inference;
pub mod observability;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod testing;
pub mod transport;

pub use command::CommandPublisher;
pub use config::*;
pub use dispatch::{matches, TopicDispatcher};
pub use error::{ServiceError, ServiceResult};
pub use inference::{InferencePipeline, IngestOutcome};
pub use protocol::*;
pub use service::{LifecycleError, TelemetryService};
pub use transport::mqtt::MqttClient;
