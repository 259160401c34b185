//! Transport layer between the telemetry components and the broker
//!
//! The [`Transport`] trait abstracts the MQTT connection so the dispatcher,
//! command publisher and service can be driven by a mock in tests. Inbound
//! messages flow the other way through an [`InboundSink`].

use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Arc;

pub mod mqtt;

pub use mqtt::{ConnectionState, DisconnectReason};

/// Receiver of every inbound message, called from the network loop
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Broker connection used by the dispatcher and command publisher
///
/// Connection outcomes are reported as booleans; the reasons are logged and
/// kept in [`Transport::last_disconnect`].
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the connection and wait for the broker acknowledgment
    async fn connect(&self) -> bool;

    /// Stop the network loop and close the connection; idempotent
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// Why the most recent connection ended, if one has
    fn last_disconnect(&self) -> Option<DisconnectReason>;

    /// Publish with explicit or configured default QoS and retain flag
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Option<QoS>,
        retain: Option<bool>,
    ) -> Result<(), Self::Error>;

    /// Subscribe a filter; it is re-subscribed after every reconnect
    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), Self::Error>;

    async fn unsubscribe(&self, pattern: &str) -> Result<(), Self::Error>;

    /// Set the receiver for inbound messages
    fn set_inbound_sink(&self, sink: Arc<dyn InboundSink>);

    /// Drop the receiver; later messages are discarded
    fn clear_inbound_sink(&self);
}

/// Map a configured QoS level onto the wire type
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }
}
