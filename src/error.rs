//! Crate-level error type
//!
//! Ingestion never returns errors (outcomes are logged and counted). This
//! type covers the fallible edges: configuration, start-up and the CLI.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::service::LifecycleError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] crate::transport::mqtt::MqttError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Predictor error: {0}")]
    Predictor(#[from] crate::inference::PredictorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Command '{command}' to {device_id} was not published")]
    CommandNotSent { device_id: String, command: String },
}

impl ServiceError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
