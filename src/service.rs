//! Service lifecycle
//!
//! [`TelemetryService`] owns one transport and wires the dispatcher, the
//! inference pipeline and the command publisher around it. There is no
//! global client: the binary builds one service, starts it, and shuts it
//! down on a signal.

use crate::command::CommandPublisher;
use crate::config::ServiceConfig;
use crate::dispatch::{MessageHandler, TopicDispatcher};
use crate::handlers::{DeviceEventHandler, SensorHandler};
use crate::inference::InferencePipeline;
use crate::observability::metrics::{metrics, MetricsSnapshot};
use crate::protocol::{
    DeviceEventKind, ALERT_SUBSCRIPTION, CLEANING_STATUS_SUBSCRIPTION, PANEL_DATA_SUBSCRIPTION,
};
use crate::storage::{JsonlRecordStore, RecordStore};
use crate::transport::mqtt::MqttClient;
use crate::transport::{qos_from_level, InboundSink, Transport};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not connect to broker: {0}")]
    ConnectionFailed(String),
    #[error("Could not subscribe to '{0}'")]
    SubscriptionFailed(String),
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),
}

pub struct TelemetryService<T: Transport + 'static> {
    config: ServiceConfig,
    transport: Arc<T>,
    dispatcher: Arc<TopicDispatcher<T>>,
    pipeline: Arc<InferencePipeline>,
    records: Arc<dyn RecordStore>,
    commands: CommandPublisher<T>,
    running: Mutex<bool>,
}

impl TelemetryService<MqttClient> {
    /// Service on an MQTT connection with HTTP predictors and file storage
    pub fn from_config(config: ServiceConfig) -> Self {
        let transport = Arc::new(MqttClient::from_config(&config));
        let pipeline = Arc::new(InferencePipeline::from_config(&config));
        let records: Arc<dyn RecordStore> =
            Arc::new(JsonlRecordStore::new(config.storage.records_dir.clone()));
        Self::new(config, transport, pipeline, records)
    }
}

impl<T: Transport + 'static> TelemetryService<T> {
    pub fn new(
        config: ServiceConfig,
        transport: Arc<T>,
        pipeline: Arc<InferencePipeline>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(TopicDispatcher::new(transport.clone())),
            commands: CommandPublisher::new(transport.clone()),
            config,
            transport,
            pipeline,
            records,
            running: Mutex::new(false),
        }
    }

    /// Connect, attach the dispatcher and register the topic handlers
    ///
    /// Starting a running service is a no-op.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let span = crate::lifecycle_span!(service_id = %self.config.service.id, phase = "start");
        async {
            let mut running = self.running.lock().await;
            if *running {
                info!("Service already running");
                return Ok(());
            }

            // Attach before connecting so retained messages are not lost
            let sink: Arc<dyn InboundSink> = self.dispatcher.clone();
            self.transport.set_inbound_sink(sink);

            if !self.transport.connect().await {
                self.transport.clear_inbound_sink();
                let reason = self
                    .transport
                    .last_disconnect()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "no acknowledgment from broker".to_string());
                error!(reason = %reason, "Service start failed");
                return Err(LifecycleError::ConnectionFailed(reason));
            }

            if let Err(e) = self.register_handlers().await {
                self.transport.disconnect().await;
                self.transport.clear_inbound_sink();
                return Err(e);
            }

            *running = true;
            info!(
                subscriptions = self.dispatcher.subscriptions().await.len(),
                "Service started"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn register_handlers(&self) -> Result<(), LifecycleError> {
        let sensor_qos = qos_from_level(self.config.sensor_qos());
        let sensor: Arc<dyn MessageHandler> = Arc::new(SensorHandler::new(self.pipeline.clone()));
        let pattern = &self.config.topics.sensor_subscription;
        if !self.dispatcher.subscribe(pattern, sensor, sensor_qos).await {
            return Err(LifecycleError::SubscriptionFailed(pattern.clone()));
        }

        if self.config.topics.auxiliary {
            let default_qos = qos_from_level(self.config.mqtt.default_qos);
            for (pattern, kind) in [
                (PANEL_DATA_SUBSCRIPTION, DeviceEventKind::PanelData),
                (CLEANING_STATUS_SUBSCRIPTION, DeviceEventKind::CleaningStatus),
                (ALERT_SUBSCRIPTION, DeviceEventKind::Alert),
            ] {
                let handler: Arc<dyn MessageHandler> =
                    Arc::new(DeviceEventHandler::new(kind, self.records.clone()));
                if !self.dispatcher.subscribe(pattern, handler, default_qos).await {
                    return Err(LifecycleError::SubscriptionFailed(pattern.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Disconnect and detach the dispatcher; safe to repeat
    pub async fn shutdown(&self) {
        let span = crate::lifecycle_span!(service_id = %self.config.service.id, phase = "shutdown");
        async {
            let mut running = self.running.lock().await;
            if !*running {
                info!("Service not running, nothing to shut down");
                return;
            }
            self.transport.disconnect().await;
            self.transport.clear_inbound_sink();
            *running = false;

            let snapshot = metrics().snapshot();
            info!(
                records_persisted = snapshot.ingest.records_persisted,
                messages_received = snapshot.mqtt.messages_received,
                commands_sent = snapshot.commands.sent,
                "Service stopped"
            );
        }
        .instrument(span)
        .await
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Send a command to a device; false when not connected or rejected
    pub async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        params: Option<Map<String, Value>>,
    ) -> bool {
        if !self.is_running().await {
            warn!(device_id = %device_id, "Command refused: service not running");
            return false;
        }
        self.commands.publish_command(device_id, command, params).await
    }

    pub fn commands(&self) -> &CommandPublisher<T> {
        &self.commands
    }

    pub fn dispatcher(&self) -> &Arc<TopicDispatcher<T>> {
        &self.dispatcher
    }

    pub fn pipeline(&self) -> &Arc<InferencePipeline> {
        &self.pipeline
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        metrics().snapshot()
    }
}
