//! Pure state transition and reconnection decisions for the MQTT client

use super::connection::{ConnectFailure, ConnectionState, DisconnectReason, ReconnectConfig};
use tracing::{error, info, warn};

/// Connection events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A connect attempt was started
    ConnectStarted,
    /// Broker acknowledged with return code 0
    ConnAckReceived,
    /// Broker refused the connect request
    Refused(ConnectFailure),
    /// Broker closed an established connection
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Close requested locally
    ClosedLocally,
}

/// Outcome of a transition: the new state and, for disconnects, the reason
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: ConnectionState,
    pub reason: Option<DisconnectReason>,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Wait, then let the loop reconnect
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Next state after a connection event (pure function)
    pub fn determine_next_state(current: ConnectionState, event: ConnectionEvent) -> Transition {
        match event {
            ConnectionEvent::ConnectStarted => Transition {
                state: ConnectionState::Connecting,
                reason: None,
            },
            ConnectionEvent::ConnAckReceived => {
                info!(from = %current, "MQTT connection established");
                Transition {
                    state: ConnectionState::Connected,
                    reason: None,
                }
            }
            ConnectionEvent::Refused(failure) => {
                error!(code = failure.code(), "Broker refused connection: {}", failure.diagnostic());
                Transition {
                    state: ConnectionState::Disconnected,
                    reason: Some(DisconnectReason::Refused(failure)),
                }
            }
            ConnectionEvent::DisconnectedByBroker => {
                warn!(from = %current, "MQTT broker closed the connection");
                Transition {
                    state: ConnectionState::Disconnected,
                    reason: Some(DisconnectReason::Unexpected(
                        "broker closed the connection".to_string(),
                    )),
                }
            }
            ConnectionEvent::NetworkError(detail) => {
                if current == ConnectionState::Connected {
                    warn!(error = %detail, "MQTT connection lost");
                } else {
                    warn!(error = %detail, "MQTT connection attempt failed");
                }
                Transition {
                    state: ConnectionState::Disconnected,
                    reason: Some(DisconnectReason::Unexpected(detail)),
                }
            }
            ConnectionEvent::ClosedLocally => {
                info!(from = %current, "MQTT connection closed");
                Transition {
                    state: ConnectionState::Disconnected,
                    reason: Some(DisconnectReason::Clean),
                }
            }
        }
    }

    /// Whether another reconnect attempt should be made (pure function)
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Publishing and subscribing need an acknowledged connection
    pub fn can_publish(state: ConnectionState) -> bool {
        state == ConnectionState::Connected
    }
}
