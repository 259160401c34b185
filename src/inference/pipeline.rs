//! Two-stage ingestion pipeline
//!
//! decode → validate → panel id → image upload → ML → (DL) → persist
//!
//! Each stage failure is contained. Decode and validation failures drop the
//! message; an image upload or predictor failure only removes fields from the
//! record; a persistence failure loses the record. Nothing is returned as an
//! error, the outcome is reported as an [`IngestOutcome`].

use super::features::FeatureVector;
use super::predictor::{ImagePredictor, TabularPredictor};
use super::providers::{image_predictor, tabular_predictor};
use crate::config::{ServiceConfig, StorageSection};
use crate::observability::metrics::metrics;
use crate::protocol::{panel_id_from_topic, EnrichedRecord, Payload, ReadingError, SensorReading};
use crate::storage::{
    ImageStore, JsonlRecordStore, LocalImageStore, RecordStore, SENSOR_COLLECTION,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Why a message never became a record
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Payload is not a structured key/value object
    Undecodable,
    /// Required sensor fields missing or malformed
    Invalid(ReadingError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Undecodable => f.write_str("payload is not a JSON object"),
            DropReason::Invalid(e) => write!(f, "{e}"),
        }
    }
}

/// Result of one pass through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Dropped { reason: DropReason },
    Persisted(EnrichedRecord),
    /// The record was built but the store rejected it
    PersistFailed(EnrichedRecord),
}

impl IngestOutcome {
    pub fn record(&self) -> Option<&EnrichedRecord> {
        match self {
            IngestOutcome::Dropped { .. } => None,
            IngestOutcome::Persisted(record) | IngestOutcome::PersistFailed(record) => Some(record),
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, IngestOutcome::Persisted(_))
    }
}

pub struct InferencePipeline {
    ml: Arc<dyn TabularPredictor>,
    dl: Arc<dyn ImagePredictor>,
    images: Arc<dyn ImageStore>,
    records: Arc<dyn RecordStore>,
}

impl InferencePipeline {
    pub fn new(
        ml: Arc<dyn TabularPredictor>,
        dl: Arc<dyn ImagePredictor>,
        images: Arc<dyn ImageStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            ml,
            dl,
            images,
            records,
        }
    }

    /// Pipeline with HTTP predictors and local file storage
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            tabular_predictor(&config.predictors.ml),
            image_predictor(&config.predictors.dl),
            Arc::new(local_image_store(&config.storage)),
            Arc::new(JsonlRecordStore::new(config.storage.records_dir.clone())),
        )
    }

    /// Run raw message bytes through the pipeline
    pub async fn ingest_bytes(&self, topic: &str, raw: &[u8]) -> IngestOutcome {
        self.ingest(topic, &Payload::decode(raw)).await
    }

    /// Run a decoded message through the pipeline
    pub async fn ingest(&self, topic: &str, payload: &Payload) -> IngestOutcome {
        self.run(topic, payload)
            .instrument(crate::ingest_span!(topic = %topic))
            .await
    }

    async fn run(&self, topic: &str, payload: &Payload) -> IngestOutcome {
        let started = Instant::now();

        let Some(object) = payload.as_object() else {
            warn!(topic = %topic, payload = %payload.to_text(), "Dropping message: payload is not a JSON object");
            metrics().payload_undecodable();
            return IngestOutcome::Dropped {
                reason: DropReason::Undecodable,
            };
        };

        let reading = match SensorReading::from_object(object) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping invalid sensor reading");
                metrics().reading_invalid();
                return IngestOutcome::Dropped {
                    reason: DropReason::Invalid(e),
                };
            }
        };

        let panel_id = panel_id_from_topic(topic);
        let mut record = EnrichedRecord::new(reading, panel_id, topic);

        self.attach_image_url(&mut record).await;
        self.predict(&mut record).await;
        self.persist(record, started).await
    }

    async fn attach_image_url(&self, record: &mut EnrichedRecord) {
        let Some(image) = record.reading.image.as_deref() else {
            return;
        };
        match self.images.upload(image, &record.panel_id).await {
            Ok(url) => {
                debug!(panel_id = %record.panel_id, url = %url, "Image uploaded");
                record.image_url = Some(url);
            }
            Err(e) => {
                warn!(panel_id = %record.panel_id, error = %e, "Image upload failed, continuing without URL");
                metrics().image_upload_failed();
            }
        }
    }

    /// Stage 1 always, stage 2 only for a dirty verdict with an image
    async fn predict(&self, record: &mut EnrichedRecord) {
        let features = FeatureVector::from_reading(&record.reading);

        let ml = match self.ml.predict(&features).await {
            Ok(ml) => ml,
            Err(e) => {
                warn!(panel_id = %record.panel_id, predictor = %self.ml.name(), error = %e, "ML predictor unavailable");
                metrics().ml_unavailable();
                return;
            }
        };
        metrics().ml_predicted();
        info!(
            panel_id = %record.panel_id,
            prediction = %ml.predicted_label,
            confidence = ml.confidence,
            "ML prediction"
        );
        let run_dl = ml.is_dirty();
        record.ml = Some(ml);

        if !run_dl {
            debug!(panel_id = %record.panel_id, "ML says clean, image check skipped");
            return;
        }
        let Some(image) = record.reading.image.clone() else {
            info!(panel_id = %record.panel_id, "ML says dirty but no image supplied, image check skipped");
            return;
        };

        metrics().dl_invoked();
        match self.dl.predict(&image).await {
            Ok(dl) => {
                info!(
                    panel_id = %record.panel_id,
                    status = %dl.predicted_label,
                    class = dl.ranking.as_ref().map(|r| r.predicted_class.as_str()).unwrap_or_default(),
                    confidence = dl.confidence,
                    "DL validation"
                );
                if !dl.is_dirty() {
                    warn!(panel_id = %record.panel_id, "ML/DL disagreement: ML=dirty, DL=clean");
                    metrics().disagreement_flagged();
                    record.ml_dl_disagreement = true;
                }
                record.dl = Some(dl);
            }
            Err(e) => {
                warn!(panel_id = %record.panel_id, predictor = %self.dl.name(), error = %e, "DL predictor unavailable");
                metrics().dl_unavailable();
            }
        }
    }

    async fn persist(&self, record: EnrichedRecord, started: Instant) -> IngestOutcome {
        match self
            .records
            .save(SENSOR_COLLECTION, &record.to_document())
            .await
        {
            Ok(()) => {
                metrics().record_persisted(started.elapsed());
                info!(
                    panel_id = %record.panel_id,
                    record_id = %record.id,
                    ml = record.ml.is_some(),
                    dl = record.dl.is_some(),
                    "Record persisted"
                );
                IngestOutcome::Persisted(record)
            }
            Err(e) => {
                error!(panel_id = %record.panel_id, record_id = %record.id, error = %e, "Failed to persist record");
                metrics().persistence_failed();
                IngestOutcome::PersistFailed(record)
            }
        }
    }
}

fn local_image_store(storage: &StorageSection) -> LocalImageStore {
    let store = LocalImageStore::new(
        storage.images_dir.clone(),
        storage.public_image_base_url.clone(),
    );
    match &storage.image_source_dir {
        Some(dir) => store.with_source_dir(dir.clone()),
        None => store,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CleanlinessLabel;
    use crate::testing::mocks::{
        MockImagePredictor, MockImageStore, MockRecordStore, MockTabularPredictor,
    };
    use serde_json::{json, Value};

    struct Harness {
        ml: Arc<MockTabularPredictor>,
        dl: Arc<MockImagePredictor>,
        images: Arc<MockImageStore>,
        records: Arc<MockRecordStore>,
        pipeline: InferencePipeline,
    }

    fn harness(ml: MockTabularPredictor, dl: MockImagePredictor) -> Harness {
        let ml = Arc::new(ml);
        let dl = Arc::new(dl);
        let images = Arc::new(MockImageStore::new());
        let records = Arc::new(MockRecordStore::new());
        let pipeline =
            InferencePipeline::new(ml.clone(), dl.clone(), images.clone(), records.clone());
        Harness {
            ml,
            dl,
            images,
            records,
            pipeline,
        }
    }

    fn payload(value: Value) -> Payload {
        Payload::Json(value)
    }

    fn reading(extra: Value) -> Payload {
        let mut base = json!({
            "temperature": 31.5,
            "humidity": 40.0,
            "light": 820.0,
            "R": 142,
            "G": 136,
            "B": 125
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        payload(base)
    }

    const TOPIC: &str = "solar/panel/panel1/data";

    #[tokio::test]
    async fn test_clean_verdict_skips_image_stage() {
        // Arrange
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Clean, 0.9),
            MockImagePredictor::returning("Dusty", 0.8),
        );

        // Act
        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image": "https://cdn/p.jpg"})))
            .await;

        // Assert
        let record = outcome.record().unwrap();
        assert!(outcome.is_persisted());
        assert_eq!(record.ml.as_ref().unwrap().predicted_label, CleanlinessLabel::Clean);
        assert!(record.dl.is_none());
        assert_eq!(h.dl.call_count().await, 0);
        assert_eq!(record.panel_id, "panel1");
    }

    #[tokio::test]
    async fn test_dirty_without_image_has_null_dl_fields() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.8),
            MockImagePredictor::returning("Dusty", 0.8),
        );

        let outcome = h.pipeline.ingest(TOPIC, &reading(json!({}))).await;

        assert!(outcome.is_persisted());
        assert_eq!(h.dl.call_count().await, 0);
        let saved = h.records.saved().await;
        assert_eq!(saved.len(), 1);
        let (collection, doc) = &saved[0];
        assert_eq!(collection, SENSOR_COLLECTION);
        assert_eq!(doc["ml_prediction"], "dirty");
        assert!(doc["dl_prediction"].is_null());
        assert!(doc["dl_status"].is_null());
        assert!(doc["dl_confidence"].is_null());
    }

    #[tokio::test]
    async fn test_dirty_with_image_runs_image_stage_on_raw_reference() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.8),
            MockImagePredictor::returning("Dusty", 0.75),
        );

        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image_path": "/captures/p1.jpg"})))
            .await;

        let record = outcome.record().unwrap();
        let dl = record.dl.as_ref().unwrap();
        assert_eq!(dl.predicted_label, CleanlinessLabel::Dirty);
        assert!(!record.ml_dl_disagreement);
        assert_eq!(h.dl.images_seen().await, vec!["/captures/p1.jpg".to_string()]);
        assert_eq!(record.image_url.as_deref(), Some("mock://images/panel1/1"));
        assert_eq!(h.images.uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn test_image_clean_verdict_flags_disagreement() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.6),
            MockImagePredictor::returning("Clean", 0.9),
        );

        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image": "https://cdn/p.jpg"})))
            .await;

        let record = outcome.record().unwrap();
        assert!(record.ml_dl_disagreement);
        assert_eq!(record.ml.as_ref().unwrap().predicted_label, CleanlinessLabel::Dirty);
        let doc = &h.records.saved().await[0].1;
        assert_eq!(doc["dl_status"], "clean");
        assert_eq!(doc["ml_dl_disagreement"], true);
    }

    #[tokio::test]
    async fn test_ml_unavailable_skips_image_stage() {
        let h = harness(
            MockTabularPredictor::unavailable(),
            MockImagePredictor::returning("Dusty", 0.8),
        );

        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image": "https://cdn/p.jpg"})))
            .await;

        let record = outcome.record().unwrap();
        assert!(record.ml.is_none());
        assert!(record.dl.is_none());
        assert_eq!(h.dl.call_count().await, 0);
        let doc = &h.records.saved().await[0].1;
        assert!(doc["ml_prediction"].is_null());
        assert!(doc["ml_confidence"].is_null());
    }

    #[tokio::test]
    async fn test_dl_unavailable_keeps_ml_result() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.8),
            MockImagePredictor::unavailable(),
        );

        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image": "https://cdn/p.jpg"})))
            .await;

        let record = outcome.record().unwrap();
        assert!(record.ml.is_some());
        assert!(record.dl.is_none());
        assert!(!record.ml_dl_disagreement);
        assert_eq!(h.dl.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_field_is_dropped_before_prediction() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.8),
            MockImagePredictor::returning("Dusty", 0.8),
        );

        let outcome = h
            .pipeline
            .ingest(
                TOPIC,
                &payload(json!({"temperature": 30.0, "light": 800.0, "R": 1, "G": 2, "B": 3})),
            )
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Dropped {
                reason: DropReason::Invalid(ReadingError::MissingFields(vec![
                    "humidity".to_string()
                ]))
            }
        );
        assert_eq!(h.ml.call_count().await, 0);
        assert!(h.records.saved().await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Clean, 0.8),
            MockImagePredictor::returning("Clean", 0.8),
        );

        let text = h.pipeline.ingest_bytes(TOPIC, b"not json {").await;
        let array = h.pipeline.ingest(TOPIC, &payload(json!([1, 2, 3]))).await;

        assert_eq!(
            text,
            IngestOutcome::Dropped {
                reason: DropReason::Undecodable
            }
        );
        assert!(matches!(array, IngestOutcome::Dropped { .. }));
        assert_eq!(h.ml.call_count().await, 0);
        assert!(h.records.saved().await.is_empty());
    }

    #[tokio::test]
    async fn test_image_upload_failure_does_not_abort() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Dirty, 0.8),
            MockImagePredictor::returning("Dusty", 0.8),
        );
        h.images.fail_uploads(true);

        let outcome = h
            .pipeline
            .ingest(TOPIC, &reading(json!({"image_base64": "aGVsbG8="})))
            .await;

        let record = outcome.record().unwrap();
        assert!(outcome.is_persisted());
        assert!(record.image_url.is_none());
        assert!(record.dl.is_some());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Clean, 0.8),
            MockImagePredictor::returning("Clean", 0.8),
        );
        h.records.fail_saves(true);

        let outcome = h.pipeline.ingest(TOPIC, &reading(json!({}))).await;

        assert!(matches!(outcome, IngestOutcome::PersistFailed(_)));
        assert!(h.records.saved().await.is_empty());
    }

    #[tokio::test]
    async fn test_features_reach_tabular_predictor() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Clean, 0.8),
            MockImagePredictor::returning("Clean", 0.8),
        );

        h.pipeline.ingest(TOPIC, &reading(json!({}))).await;

        let seen = h.ml.features_seen().await;
        assert_eq!(seen.len(), 1);
        assert!((seen[0].rgb_mean() - 134.333_333).abs() < 1e-5);
        assert!((seen[0].g_over_r() - 0.9577).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_extras_and_metadata_in_document() {
        let h = harness(
            MockTabularPredictor::returning(CleanlinessLabel::Clean, 0.8),
            MockImagePredictor::returning("Clean", 0.8),
        );

        h.pipeline
            .ingest(
                "sensors/roof/panel9",
                &reading(json!({"firmware": "1.2.0", "image": ""})),
            )
            .await;

        let doc = &h.records.saved().await[0].1;
        assert_eq!(doc["firmware"], "1.2.0");
        assert_eq!(doc["panel_id"], "panel9");
        assert_eq!(doc["topic"], "sensors/roof/panel9");
        assert!(doc["timestamp"].is_string());
        assert!(doc.get("image").is_none());
        assert!(doc["image_url"].is_null());
        assert!(h.images.uploads().await.is_empty());
    }
}
