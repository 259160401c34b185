//! Dispatcher handlers for the telemetry topics
//!
//! Sensor topics feed the inference pipeline. The auxiliary device topics
//! (panel data, cleaning status, alerts) are stored as [`DeviceEvent`]s
//! without inference.

use crate::dispatch::MessageHandler;
use crate::inference::InferencePipeline;
use crate::observability::metrics::metrics;
use crate::protocol::{source_id_from_topic, DeviceEvent, DeviceEventKind, Payload};
use crate::storage::RecordStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Hands every sensor message to the inference pipeline
pub struct SensorHandler {
    pipeline: Arc<InferencePipeline>,
}

impl SensorHandler {
    pub fn new(pipeline: Arc<InferencePipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl MessageHandler for SensorHandler {
    async fn handle(&self, topic: &str, payload: &Payload) {
        let outcome = self.pipeline.ingest(topic, payload).await;
        debug!(topic = %topic, persisted = outcome.is_persisted(), "Sensor message handled");
    }
}

/// Stores auxiliary device messages in their collection
pub struct DeviceEventHandler {
    kind: DeviceEventKind,
    records: Arc<dyn RecordStore>,
}

impl DeviceEventHandler {
    pub fn new(kind: DeviceEventKind, records: Arc<dyn RecordStore>) -> Self {
        Self { kind, records }
    }
}

#[async_trait]
impl MessageHandler for DeviceEventHandler {
    async fn handle(&self, topic: &str, payload: &Payload) {
        let source_id = source_id_from_topic(topic);
        let Some(event) = DeviceEvent::from_payload(self.kind, source_id, topic, payload) else {
            warn!(topic = %topic, kind = ?self.kind, "Dropping device message: JSON object expected");
            metrics().payload_undecodable();
            return;
        };

        if self.kind == DeviceEventKind::Alert {
            warn!(
                source_id = %event.source_id,
                severity = event.body.get("severity").and_then(|s| s.as_str()).unwrap_or("info"),
                message = event.body.get("message").and_then(|m| m.as_str()).unwrap_or_default(),
                "Device alert"
            );
        }

        match self
            .records
            .save(self.kind.collection(), &event.to_document())
            .await
        {
            Ok(()) => {
                metrics().device_event_persisted();
                info!(
                    source_id = %event.source_id,
                    collection = %self.kind.collection(),
                    "Device event stored"
                );
            }
            Err(e) => {
                metrics().persistence_failed();
                error!(source_id = %event.source_id, error = %e, "Failed to store device event");
            }
        }
    }
}
