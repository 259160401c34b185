//! Outbound device commands

use crate::observability::metrics::metrics;
use crate::protocol::{CommandMessage, TopicBuilder};
use crate::transport::Transport;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Publishes commands to `solar/commands/<device_id>`
///
/// Success means the transport accepted the publish; there is no
/// acknowledgment of execution by the device.
pub struct CommandPublisher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> CommandPublisher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Send `command` with optional extra parameters
    ///
    /// `command`, `device_id` and `timestamp` in `params` are ignored.
    pub async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        params: Option<Map<String, Value>>,
    ) -> bool {
        if !is_valid_device_id(device_id) || command.trim().is_empty() {
            warn!(device_id = %device_id, command = %command, "Refusing command with empty or invalid target");
            metrics().command_failed();
            return false;
        }

        let message = CommandMessage::new(device_id, command, params);
        let body = match serde_json::to_vec(&message.to_payload()) {
            Ok(body) => body,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to encode command");
                metrics().command_failed();
                return false;
            }
        };

        let topic = TopicBuilder::build_command_topic(device_id);
        match self.transport.publish(&topic, body, None, None).await {
            Ok(()) => {
                info!(device_id = %device_id, command = %command, topic = %topic, "Command sent");
                metrics().command_sent();
                true
            }
            Err(e) => {
                error!(device_id = %device_id, command = %command, error = %e, "Failed to send command");
                metrics().command_failed();
                false
            }
        }
    }
}

/// A device id must be exactly one literal topic segment
fn is_valid_device_id(device_id: &str) -> bool {
    !device_id.trim().is_empty() && !device_id.contains(['/', '+', '#'])
}
