//! Mock implementations for testing
//!
//! Provides a mock [`Transport`], recording handlers, scripted predictors and
//! in-memory stores so the dispatcher, pipeline and service can be exercised
//! without a broker, a model server or a filesystem.

use crate::dispatch::MessageHandler;
use crate::inference::predictor::{image_result, tabular_result};
use crate::inference::{FeatureVector, ImagePredictor, PredictorError, TabularPredictor};
use crate::protocol::{CleanlinessLabel, PredictionResult, Payload};
use crate::storage::{ImageStore, RecordStore, StorageError};
use crate::transport::{ConnectionState, DisconnectReason, InboundSink, Transport};
use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// One message handed to [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Option<QoS>,
    pub retain: Option<bool>,
}

#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("not connected")]
    NotConnected,
    #[error("rejected by mock transport")]
    Rejected,
}

/// Mock transport for testing
///
/// Connects instantly unless built with [`MockTransport::refusing_connections`].
#[derive(Default)]
pub struct MockTransport {
    refuse_connections: bool,
    connected: AtomicBool,
    fail_operations: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    last_disconnect: std::sync::Mutex<Option<DisconnectReason>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    sink: std::sync::Mutex<Option<Arc<dyn InboundSink>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `connect` fails with an unexpected disconnect
    pub fn refusing_connections() -> Self {
        Self {
            refuse_connections: true,
            ..Default::default()
        }
    }

    /// Make publish/subscribe/unsubscribe fail while connected
    pub fn set_operation_failure(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    /// Simulate a network drop
    pub fn drop_connection(&self, detail: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if let Ok(mut last) = self.last_disconnect.lock() {
            *last = Some(DisconnectReason::Unexpected(detail.to_string()));
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub async fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Patterns currently subscribed, in subscription order
    pub async fn subscribed_patterns(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }

    pub fn has_inbound_sink(&self) -> bool {
        self.sink.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Deliver a message as if it came from the broker
    ///
    /// Returns false when no sink is attached.
    pub async fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        match sink {
            Some(sink) => {
                sink.on_message(topic, payload).await;
                true
            }
            None => false,
        }
    }

    fn check_ready(&self) -> Result<(), MockTransportError> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.fail_operations.load(Ordering::SeqCst) {
            return Err(MockTransportError::Rejected);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&self) -> bool {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connections {
            if let Ok(mut last) = self.last_disconnect.lock() {
                *last = Some(DisconnectReason::Unexpected(
                    "connection refused".to_string(),
                ));
            }
            return false;
        }
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Ok(mut last) = self.last_disconnect.lock() {
                *last = Some(DisconnectReason::Clean);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect.lock().ok().and_then(|l| l.clone())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Option<QoS>,
        retain: Option<bool>,
    ) -> Result<(), Self::Error> {
        self.check_ready()?;
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), Self::Error> {
        self.check_ready()?;
        let mut subscriptions = self.subscriptions.lock().await;
        match subscriptions.iter_mut().find(|(p, _)| p == pattern) {
            Some(existing) => existing.1 = qos,
            None => subscriptions.push((pattern.to_string(), qos)),
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), Self::Error> {
        self.check_ready()?;
        self.subscriptions.lock().await.retain(|(p, _)| p != pattern);
        Ok(())
    }

    fn set_inbound_sink(&self, sink: Arc<dyn InboundSink>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = Some(sink);
        }
    }

    fn clear_inbound_sink(&self) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = None;
        }
    }
}

/// Handler that records every message it receives
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(String, Payload)>>,
}

impl RecordingHandler {
    pub async fn calls(&self) -> Vec<(String, Payload)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, topic: &str, payload: &Payload) {
        self.calls
            .lock()
            .await
            .push((topic.to_string(), payload.clone()));
    }
}

fn binary_probabilities(label: CleanlinessLabel, confidence: f64) -> BTreeMap<CleanlinessLabel, f64> {
    let other = match label {
        CleanlinessLabel::Clean => CleanlinessLabel::Dirty,
        CleanlinessLabel::Dirty => CleanlinessLabel::Clean,
    };
    BTreeMap::from([(label, confidence), (other, 1.0 - confidence)])
}

/// Scripted stage-1 predictor
pub struct MockTabularPredictor {
    response: Result<PredictionResult, PredictorError>,
    seen: Mutex<Vec<FeatureVector>>,
}

impl MockTabularPredictor {
    pub fn returning(label: CleanlinessLabel, confidence: f64) -> Self {
        Self {
            response: tabular_result(label, None, binary_probabilities(label, confidence)),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            response: Err(PredictorError::RequestFailed("model not loaded".into())),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn features_seen(&self) -> Vec<FeatureVector> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl TabularPredictor for MockTabularPredictor {
    fn name(&self) -> &str {
        "mock-tabular"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<PredictionResult, PredictorError> {
        self.seen.lock().await.push(*features);
        self.response.clone()
    }
}

/// Scripted stage-2 predictor
///
/// `returning("Dusty", 0.8)` ranks Dusty at 0.8 and Clean at 0.2.
pub struct MockImagePredictor {
    response: Result<PredictionResult, PredictorError>,
    seen: Mutex<Vec<String>>,
}

impl MockImagePredictor {
    pub fn returning(class: &str, confidence: f64) -> Self {
        let runner_up = if class.eq_ignore_ascii_case("clean") {
            "Dusty"
        } else {
            "Clean"
        };
        Self {
            response: image_result(
                vec![
                    (class.to_string(), confidence),
                    (runner_up.to_string(), 1.0 - confidence),
                ],
                Some(0),
            ),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            response: Err(PredictorError::Timeout(10_000)),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn images_seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl ImagePredictor for MockImagePredictor {
    fn name(&self) -> &str {
        "mock-image"
    }

    async fn predict(&self, image: &str) -> Result<PredictionResult, PredictorError> {
        self.seen.lock().await.push(image.to_string());
        self.response.clone()
    }
}

/// In-memory image store returning `mock://images/<panel_id>/<n>`
#[derive(Default)]
pub struct MockImageStore {
    fail: AtomicBool,
    uploads: Mutex<Vec<(String, String)>>,
}

impl MockImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(image_ref, panel_id)` of every successful upload
    pub async fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn upload(&self, image_ref: &str, panel_id: &str) -> Result<String, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidImage("mock upload failure".into()));
        }
        let mut uploads = self.uploads.lock().await;
        uploads.push((image_ref.to_string(), panel_id.to_string()));
        Ok(format!("mock://images/{panel_id}/{}", uploads.len()))
    }
}

/// In-memory record store
#[derive(Default)]
pub struct MockRecordStore {
    fail: AtomicBool,
    saved: Mutex<Vec<(String, Value)>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(collection, document)` of every successful save
    pub async fn saved(&self) -> Vec<(String, Value)> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn save(&self, collection: &str, document: &Value) -> Result<(), StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock store unavailable",
            )));
        }
        self.saved
            .lock()
            .await
            .push((collection.to_string(), document.clone()));
        Ok(())
    }
}
