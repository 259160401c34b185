//! MQTT connection manager
//!
//! Owns the `rumqttc` client and the background network loop. All state
//! transitions happen in the loop and are published through a `watch`
//! channel; callers only observe booleans and the current state.

use super::connection::{
    configure_mqtt_options, ConnectFailure, ConnectionState, DisconnectReason, MqttError,
    ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::{MqttSection, ServiceConfig};
use crate::observability::metrics::metrics;
use crate::transport::{qos_from_level, InboundSink, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long a stopping network loop gets before it is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type SinkSlot = Option<Arc<dyn InboundSink>>;

/// MQTT 3.1.1 connection manager
pub struct MqttClient {
    client_id: String,
    config: MqttSection,
    reconnect_config: ReconnectConfig,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    disconnect_tx: Arc<watch::Sender<Option<DisconnectReason>>>,
    sink_tx: watch::Sender<SinkSlot>,
    client: RwLock<Option<AsyncClient>>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    lifecycle: Mutex<()>,
}

impl MqttClient {
    pub fn new(client_id: impl Into<String>, config: MqttSection) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (disconnect_tx, _) = watch::channel(None);
        let (sink_tx, _) = watch::channel(None);

        Self {
            client_id: client_id.into(),
            reconnect_config: ReconnectConfig::from(&config.reconnect),
            config,
            state_tx: Arc::new(state_tx),
            disconnect_tx: Arc::new(disconnect_tx),
            sink_tx,
            client: RwLock::new(None),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(()),
        }
    }

    /// Client for a service configuration, with the sensor subscription as
    /// the default topic restored on every connect
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.client_id(), config.mqtt.clone()).with_default_subscription(
            &config.topics.sensor_subscription,
            qos_from_level(config.sensor_qos()),
        )
    }

    /// Track a filter that is subscribed on every (re)connect
    pub fn with_default_subscription(mut self, pattern: &str, qos: QoS) -> Self {
        match Arc::get_mut(&mut self.subscriptions) {
            Some(subscriptions) => {
                subscriptions.get_mut().insert(pattern.to_string(), qos);
            }
            None => warn!(pattern = %pattern, "Subscriptions already shared, default not added"),
        }
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Filters restored after a reconnect, sorted by pattern
    pub async fn tracked_subscriptions(&self) -> Vec<(String, QoS)> {
        let subscriptions = self.subscriptions.lock().await;
        MessageHandler::build_resubscription_list(&subscriptions)
    }

    /// The network loop gave up reconnecting (or was never started)
    pub async fn is_permanently_disconnected(&self) -> bool {
        if self.is_connected() {
            return false;
        }
        match self.event_loop_handle.lock().await.as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Connect and wait for the broker acknowledgment
    ///
    /// Returns false on invalid settings, refusal or timeout; the cause is
    /// logged and kept in `last_disconnect`. A failed attempt stops the
    /// network loop it started.
    pub async fn connect(&self) -> bool {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            debug!(client_id = %self.client_id, "Already connected");
            return true;
        }

        self.stop_event_loop(false).await;
        metrics().connection_attempt();
        apply_transition(
            &self.state_tx,
            &self.disconnect_tx,
            ConnectionEvent::ConnectStarted,
        );

        let options = match configure_mqtt_options(&self.client_id, &self.config) {
            Ok(options) => options,
            Err(e) => {
                error!(broker = %self.config.broker_url, error = %e, "Invalid MQTT connection settings");
                apply_transition(
                    &self.state_tx,
                    &self.disconnect_tx,
                    ConnectionEvent::NetworkError(e.to_string()),
                );
                metrics().connection_failed();
                return false;
            }
        };

        let (client, event_loop) = AsyncClient::new(options, self.config.channel_capacity);
        self.closing.store(false, Ordering::SeqCst);

        let state_rx = self.state_tx.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let context = LoopContext {
            client: client.clone(),
            state_tx: self.state_tx.clone(),
            disconnect_tx: self.disconnect_tx.clone(),
            sink_rx: self.sink_tx.subscribe(),
            subscriptions: self.subscriptions.clone(),
            reconnect_config: self.reconnect_config.clone(),
            closing: self.closing.clone(),
        };

        info!(
            client_id = %self.client_id,
            broker = %self.config.broker_url,
            "Connecting to MQTT broker"
        );
        let handle = tokio::spawn(run_event_loop(event_loop, context, shutdown_rx));

        *self.client.write().await = Some(client);
        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.event_loop_handle.lock().await = Some(handle);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match Self::wait_for_connection_confirmation(state_rx, timeout).await {
            Ok(()) => true,
            Err(e) => {
                warn!(broker = %self.config.broker_url, error = %e, "MQTT connect failed");
                self.stop_event_loop(false).await;
                if *self.state_tx.borrow() != ConnectionState::Disconnected {
                    apply_transition(
                        &self.state_tx,
                        &self.disconnect_tx,
                        ConnectionEvent::NetworkError(e.to_string()),
                    );
                }
                metrics().connection_failed();
                false
            }
        }
    }

    /// Stop the network loop and close the connection; safe to repeat
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        let was_connected = self.is_connected();
        let has_loop = self.event_loop_handle.lock().await.is_some();
        if !was_connected && !has_loop {
            debug!(client_id = %self.client_id, "Disconnect requested while not connected");
            return;
        }

        self.stop_event_loop(was_connected).await;

        if was_connected {
            if *self.state_tx.borrow() != ConnectionState::Disconnected {
                apply_transition(
                    &self.state_tx,
                    &self.disconnect_tx,
                    ConnectionEvent::ClosedLocally,
                );
            }
        } else {
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
        info!(client_id = %self.client_id, "MQTT client disconnected");
    }

    /// Wait for the Connected state with a timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected => {
                        return Err(MqttError::ConnectionFailed(
                            "broker connection attempt failed".to_string(),
                        ));
                    }
                    ConnectionState::Connecting => continue,
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(format!(
                "ConnAck timeout - no acknowledgment within {}s",
                timeout.as_secs_f32()
            ))),
        }
    }

    /// Stop the network loop, optionally sending DISCONNECT first
    async fn stop_event_loop(&self, request_clean: bool) {
        let handle = self.event_loop_handle.lock().await.take();
        let shutdown_tx = self.shutdown_tx.lock().await.take();
        let client = self.client.write().await.take();
        let Some(mut handle) = handle else {
            return;
        };

        self.closing.store(true, Ordering::SeqCst);

        if request_clean {
            if let Some(client) = &client {
                match client.try_disconnect() {
                    Ok(()) => {
                        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_ok() {
                            debug!("Network loop stopped after DISCONNECT");
                            return;
                        }
                    }
                    Err(e) => debug!(error = %e, "Could not queue DISCONNECT"),
                }
            }
        }

        if let Some(shutdown_tx) = shutdown_tx {
            shutdown_tx.send_replace(true);
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("Network loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "Network loop ended with error"),
            Err(_) => {
                warn!("Network loop did not stop in time, aborting");
                handle.abort();
            }
            _ => {}
        }
    }

    /// Sleep that ends early on shutdown
    ///
    /// Returns true if the full delay elapsed, false if shutdown was requested.
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received during reconnect delay");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        let state = *self.state_tx.borrow();
        if HealthMonitor::can_publish(state) {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }

    async fn active_client(&self) -> Result<AsyncClient, MqttError> {
        self.ensure_connected()?;
        self.client
            .read()
            .await
            .clone()
            .ok_or(MqttError::NotConnected {
                state: ConnectionState::Disconnected,
            })
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> bool {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) {
        MqttClient::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.disconnect_tx.borrow().clone()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Option<QoS>,
        retain: Option<bool>,
    ) -> Result<(), Self::Error> {
        let client = self.active_client().await?;
        let qos = qos.unwrap_or_else(|| qos_from_level(self.config.default_qos));
        let retain = retain.unwrap_or(self.config.default_retain);

        match client.publish(topic, qos, retain, payload).await {
            Ok(()) => {
                metrics().message_published();
                debug!(topic = %topic, qos = ?qos, retain, "Published message");
                Ok(())
            }
            Err(e) => {
                metrics().publish_failed();
                Err(MqttError::PublishFailed(Box::new(e)))
            }
        }
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), Self::Error> {
        let client = self.active_client().await?;
        client
            .subscribe(pattern, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        self.subscriptions
            .lock()
            .await
            .insert(pattern.to_string(), qos);
        info!(pattern = %pattern, qos = ?qos, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), Self::Error> {
        let client = self.active_client().await?;
        client
            .unsubscribe(pattern)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        self.subscriptions.lock().await.remove(pattern);
        info!(pattern = %pattern, "Unsubscribed");
        Ok(())
    }

    fn set_inbound_sink(&self, sink: Arc<dyn InboundSink>) {
        self.sink_tx.send_replace(Some(sink));
    }

    fn clear_inbound_sink(&self) {
        self.sink_tx.send_replace(None);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.get_mut().take() {
            shutdown_tx.send_replace(true);
        }
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Apply a connection event: record the disconnect reason, then the state
fn apply_transition(
    state_tx: &watch::Sender<ConnectionState>,
    disconnect_tx: &watch::Sender<Option<DisconnectReason>>,
    event: ConnectionEvent,
) {
    let current = *state_tx.borrow();
    let transition = HealthMonitor::determine_next_state(current, event);
    if let Some(reason) = transition.reason {
        disconnect_tx.send_replace(Some(reason));
    }
    state_tx.send_replace(transition.state);
}

/// Everything the network loop shares with the manager
struct LoopContext {
    client: AsyncClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    disconnect_tx: Arc<watch::Sender<Option<DisconnectReason>>>,
    sink_rx: watch::Receiver<SinkSlot>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    reconnect_config: ReconnectConfig,
    closing: Arc<AtomicBool>,
}

impl LoopContext {
    fn transition(&self, event: ConnectionEvent) {
        apply_transition(&self.state_tx, &self.disconnect_tx, event);
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns false when the loop should stop
    async fn process_event_route(&self, route: EventRoute, attempts: &mut u32) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { session_present } => {
                *attempts = 0;
                self.resubscribe().await;
                self.transition(ConnectionEvent::ConnAckReceived);
                metrics().connection_established();
                debug!(session_present, "Broker acknowledged connection");
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                let sink = self.sink_rx.borrow().clone();
                match sink {
                    Some(sink) => sink.on_message(&topic, &payload).await,
                    None => debug!(topic = %topic, "No inbound sink set, message dropped"),
                }
                true
            }
            EventRoute::Disconnected => {
                self.transition(ConnectionEvent::DisconnectedByBroker);
                metrics().connection_lost();
                true
            }
            EventRoute::DisconnectSent => {
                self.transition(ConnectionEvent::ClosedLocally);
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                if failures > 0 {
                    warn!(packet_id, failures, "Broker rejected subscription filters");
                } else {
                    debug!(packet_id, "Subscription confirmed");
                }
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Record the failure and back off; returns false when the loop should stop
    async fn handle_event_loop_error(
        &self,
        error: ConnectionError,
        attempts: &mut u32,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            self.transition(ConnectionEvent::ClosedLocally);
            return false;
        }

        let was_connected = self.state() == ConnectionState::Connected;
        let event = match &error {
            ConnectionError::ConnectionRefused(code) => match ConnectFailure::from_return_code(*code) {
                Some(failure) => ConnectionEvent::Refused(failure),
                None => ConnectionEvent::NetworkError(error.to_string()),
            },
            other => ConnectionEvent::NetworkError(other.to_string()),
        };
        self.transition(event);
        if was_connected {
            metrics().connection_lost();
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            *attempts,
            &self.reconnect_config,
            *shutdown_rx.borrow(),
        );
        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *attempts = attempt;
                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("unlimited".to_string(), |max| max.to_string());
                info!(attempt, max = %max_display, delay_ms, "Reconnecting to MQTT broker");
                let resume = MqttClient::interruptible_sleep(shutdown_rx, delay_ms).await;
                if resume {
                    self.transition(ConnectionEvent::ConnectStarted);
                }
                resume
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(
                    attempts = *attempts,
                    "Maximum reconnection attempts exceeded, network loop stopping"
                );
                false
            }
        }
    }

    /// Restore every tracked filter without blocking the loop
    async fn resubscribe(&self) {
        let topics = {
            let subscriptions = self.subscriptions.lock().await;
            MessageHandler::build_resubscription_list(&subscriptions)
        };
        for (topic, qos) in topics {
            match self.client.try_subscribe(topic.as_str(), qos) {
                Ok(()) => debug!(topic = %topic, "Re-subscribed"),
                Err(e) => error!(topic = %topic, error = %e, "Failed to re-subscribe"),
            }
        }
    }
}

/// Background network loop: polls the event loop until shutdown
async fn run_event_loop(
    mut event_loop: EventLoop,
    context: LoopContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempts = 0u32;

    loop {
        let polled = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received, stopping network loop");
                    break;
                }
                continue;
            }
            polled = event_loop.poll() => polled,
        };

        let keep_running = match polled {
            Ok(event) => {
                let route = MessageHandler::route_mqtt_event(&event);
                context.process_event_route(route, &mut attempts).await
            }
            Err(e) => {
                context
                    .handle_event_loop_error(e, &mut attempts, shutdown_rx.clone())
                    .await
            }
        };
        if !keep_running {
            break;
        }
    }

    debug!("MQTT network loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> MqttSection {
        let mut config = ServiceConfig::test_config().mqtt;
        config.broker_url = "mqtt://127.0.0.1:1".to_string();
        config.connect_timeout_secs = 2;
        config.reconnect.backoff_ms = vec![50];
        config.reconnect.max_attempts = Some(1);
        config
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        // Arrange
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        // Act
        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(20)).await;

        assert!(result.unwrap_err().to_string().contains("timeout"));
        drop(state_tx);
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state_tx.send_replace(ConnectionState::Disconnected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(MqttClient::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            shutdown_tx.send_replace(true);
        });

        assert!(!MqttClient::interruptible_sleep(shutdown_rx, 5_000).await);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let client = MqttClient::new("panel-ingest", ServiceConfig::test_config().mqtt);

        assert!(!client.is_connected());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.last_disconnect(), None);
        assert_eq!(client.client_id(), "panel-ingest");
        assert!(client.is_permanently_disconnected().await);
    }

    #[tokio::test]
    async fn test_from_config_tracks_sensor_subscription() {
        let client = MqttClient::from_config(&ServiceConfig::test_config());
        assert_eq!(
            client.tracked_subscriptions().await,
            vec![("solar/panel/#".to_string(), QoS::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_chained_default_subscriptions_are_all_tracked() {
        // Arrange
        let client = MqttClient::new("panel-ingest", ServiceConfig::test_config().mqtt)
            .with_default_subscription("solar/panel/#", QoS::AtLeastOnce)
            .with_default_subscription("solar/alerts/+/message", QoS::AtMostOnce)
            .with_default_subscription("solar/panel/#", QoS::ExactlyOnce);

        // Act
        let tracked = client.tracked_subscriptions().await;

        // Assert
        assert_eq!(
            tracked,
            vec![
                ("solar/alerts/+/message".to_string(), QoS::AtMostOnce),
                ("solar/panel/#".to_string(), QoS::ExactlyOnce),
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let client = MqttClient::new("panel-ingest", ServiceConfig::test_config().mqtt);

        assert!(matches!(
            client.publish("solar/commands/x", b"{}".to_vec(), None, None).await,
            Err(MqttError::NotConnected { .. })
        ));
        assert!(client.subscribe("solar/#", QoS::AtMostOnce).await.is_err());
        assert!(client.unsubscribe("solar/#").await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let client = MqttClient::new("panel-ingest", ServiceConfig::test_config().mqtt);

        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.last_disconnect(), None);
    }

    #[tokio::test]
    async fn test_connect_with_invalid_settings_returns_false() {
        let client = MqttClient::new("", ServiceConfig::test_config().mqtt);

        assert!(!client.connect().await);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.last_disconnect(),
            Some(DisconnectReason::Unexpected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_returns_false() {
        // Arrange
        let client = MqttClient::new("panel-ingest", unreachable_config());

        // Act
        let connected = client.connect().await;

        // Assert
        assert!(!connected);
        assert!(!client.is_connected());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.last_disconnect(),
            Some(DisconnectReason::Unexpected(_))
        ));

        // The failed attempt must not leave a loop behind
        assert!(client.event_loop_handle.lock().await.is_none());
        assert!(client.is_permanently_disconnected().await);
        client.disconnect().await;
    }
}
