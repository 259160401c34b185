//! Telemetry message and record structures
//!
//! Inbound payloads are decoded into explicit records: a [`SensorReading`]
//! for sensor topics and a [`DeviceEvent`] for the auxiliary topics. The
//! inference pipeline turns a reading into an [`EnrichedRecord`], which is
//! flattened into a storage document only at persistence time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Payload keys accepted as an image reference, in priority order
pub const IMAGE_ALIASES: [&str; 3] = ["image", "image_path", "image_base64"];

/// Required numeric sensor channels
pub const REQUIRED_FIELDS: [&str; 6] = ["temperature", "humidity", "light", "R", "G", "B"];

/// Inbound message body, decoded opportunistically
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON
    Json(Value),
    /// Body that is not JSON, kept as text
    Text(String),
}

impl Payload {
    /// Decode raw bytes as JSON, falling back to the (lossy) text form
    pub fn decode(raw: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(String::from_utf8_lossy(raw).into_owned()),
        }
    }

    /// Structured key/value view of the payload, if it has one
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Json(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// Text form of the payload for logging
    pub fn to_text(&self) -> String {
        match self {
            Payload::Json(value) => value.to_string(),
            Payload::Text(text) => text.clone(),
        }
    }
}

/// Cleanliness verdict shared by both prediction stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanlinessLabel {
    Clean,
    Dirty,
}

impl CleanlinessLabel {
    /// Parse a label name, ignoring case
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "clean" => Some(Self::Clean),
            "dirty" => Some(Self::Dirty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
        }
    }
}

impl fmt::Display for CleanlinessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which predictor produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStage {
    /// Fast tabular classifier over sensor features
    Ml,
    /// Image classifier used to confirm a "dirty" verdict
    Dl,
}

/// One entry of a class ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedClass {
    pub class: String,
    pub probability: f64,
}

/// Full ranking over the image model's trained classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRanking {
    /// Fine-grained class name of the top prediction
    pub predicted_class: String,
    /// Index of the predicted class in the model's output layer
    pub predicted_index: usize,
    /// Every class, sorted by descending probability
    pub classes: Vec<RankedClass>,
}

impl ClassRanking {
    /// Sort class probabilities into a ranking
    ///
    /// Returns `None` when there are no classes to rank.
    pub fn from_probabilities(
        probabilities: impl IntoIterator<Item = (String, f64)>,
        predicted_index: Option<usize>,
    ) -> Option<Self> {
        let mut classes: Vec<RankedClass> = probabilities
            .into_iter()
            .map(|(class, probability)| RankedClass { class, probability })
            .collect();
        classes.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.class.cmp(&b.class))
        });

        let top = classes.first()?.class.clone();
        Some(Self {
            predicted_class: top,
            predicted_index: predicted_index.unwrap_or(0),
            classes,
        })
    }

    /// Probability of a class by name
    pub fn probability_of(&self, class: &str) -> Option<f64> {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map(|c| c.probability)
    }
}

/// Output of either prediction stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub stage: PredictionStage,
    pub predicted_label: CleanlinessLabel,
    /// Probability of the predicted label, in [0, 1]
    pub confidence: f64,
    pub per_class_probabilities: BTreeMap<CleanlinessLabel, f64>,
    /// Present on image-model results only
    pub ranking: Option<ClassRanking>,
}

/// Rejection of a predictor output that violates the result invariants
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictionError {
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("probability for {label} is {value}, outside [0, 1]")]
    ProbabilityOutOfRange { label: CleanlinessLabel, value: f64 },
}

impl PredictionResult {
    /// Build a result, checking that every probability lies in [0, 1]
    pub fn new(
        stage: PredictionStage,
        predicted_label: CleanlinessLabel,
        confidence: f64,
        per_class_probabilities: BTreeMap<CleanlinessLabel, f64>,
    ) -> Result<Self, PredictionError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(PredictionError::ConfidenceOutOfRange(confidence));
        }
        for (label, value) in &per_class_probabilities {
            if !(0.0..=1.0).contains(value) {
                return Err(PredictionError::ProbabilityOutOfRange {
                    label: *label,
                    value: *value,
                });
            }
        }
        Ok(Self {
            stage,
            predicted_label,
            confidence,
            per_class_probabilities,
            ranking: None,
        })
    }

    pub fn with_ranking(mut self, ranking: ClassRanking) -> Self {
        self.ranking = Some(ranking);
        self
    }

    pub fn is_dirty(&self) -> bool {
        self.predicted_label == CleanlinessLabel::Dirty
    }

    fn probabilities_value(&self) -> Value {
        if self.per_class_probabilities.is_empty() {
            return Value::Null;
        }
        let map: Map<String, Value> = self
            .per_class_probabilities
            .iter()
            .map(|(label, p)| (label.as_str().to_string(), json!(p)))
            .collect();
        Value::Object(map)
    }
}

/// Why a payload could not become a [`SensorReading`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadingError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Validated sensor sample from one panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
    #[serde(rename = "R")]
    pub r: u8,
    #[serde(rename = "G")]
    pub g: u8,
    #[serde(rename = "B")]
    pub b: u8,
    /// First non-empty of `image`, `image_path`, `image_base64`
    pub image: Option<String>,
    /// Payload keys that are neither sensor channels nor image aliases
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl SensorReading {
    /// Validate a decoded payload object
    ///
    /// Every missing required field is reported at once; type and range
    /// problems are reported for the first offending field.
    pub fn from_object(object: &Map<String, Value>) -> Result<Self, ReadingError> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|field| !object.contains_key(**field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReadingError::MissingFields(missing));
        }

        let image = IMAGE_ALIASES.iter().find_map(|alias| {
            object
                .get(*alias)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        });

        let extra = object
            .iter()
            .filter(|(key, _)| {
                !REQUIRED_FIELDS.contains(&key.as_str()) && !IMAGE_ALIASES.contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            temperature: number_field(object, "temperature")?,
            humidity: number_field(object, "humidity")?,
            light: number_field(object, "light")?,
            r: channel_field(object, "R")?,
            g: channel_field(object, "G")?,
            b: channel_field(object, "B")?,
            image,
            extra,
        })
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

fn number_field(object: &Map<String, Value>, field: &str) -> Result<f64, ReadingError> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| ReadingError::InvalidField {
            field: field.to_string(),
            reason: "expected a number".to_string(),
        })
}

fn channel_field(object: &Map<String, Value>, field: &str) -> Result<u8, ReadingError> {
    let value = number_field(object, field)?;
    if value.fract() != 0.0 || !(0.0..=255.0).contains(&value) {
        return Err(ReadingError::InvalidField {
            field: field.to_string(),
            reason: format!("expected an integer in 0..=255, got {value}"),
        });
    }
    Ok(value as u8)
}

/// Sensor reading plus everything the pipeline learned about it
///
/// Created per inbound message, filled in stage by stage, persisted once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: Uuid,
    pub reading: SensorReading,
    /// Durable URL of the uploaded image, when the upload succeeded
    pub image_url: Option<String>,
    pub ml: Option<PredictionResult>,
    /// Populated only when `ml` says dirty and an image was supplied
    pub dl: Option<PredictionResult>,
    /// ML said dirty and DL said clean
    pub ml_dl_disagreement: bool,
    pub panel_id: String,
    pub ingested_at: DateTime<Utc>,
    pub topic: String,
}

impl EnrichedRecord {
    /// Start a record for a freshly validated reading
    pub fn new(reading: SensorReading, panel_id: String, topic: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            reading,
            image_url: None,
            ml: None,
            dl: None,
            ml_dl_disagreement: false,
            panel_id,
            ingested_at: Utc::now(),
            topic: topic.to_string(),
        }
    }

    /// Flatten into the persisted document layout
    ///
    /// Stages that did not run are written as explicit nulls.
    pub fn to_document(&self) -> Value {
        let mut doc = self.reading.extra.clone();

        doc.insert("id".into(), json!(self.id));
        doc.insert("temperature".into(), json!(self.reading.temperature));
        doc.insert("humidity".into(), json!(self.reading.humidity));
        doc.insert("light".into(), json!(self.reading.light));
        doc.insert("R".into(), json!(self.reading.r));
        doc.insert("G".into(), json!(self.reading.g));
        doc.insert("B".into(), json!(self.reading.b));
        doc.insert("image_url".into(), json!(self.image_url));

        match &self.ml {
            Some(ml) => {
                doc.insert("ml_prediction".into(), json!(ml.predicted_label));
                doc.insert("ml_confidence".into(), json!(ml.confidence));
                doc.insert("ml_probability".into(), ml.probabilities_value());
            }
            None => {
                for key in ["ml_prediction", "ml_confidence", "ml_probability"] {
                    doc.insert(key.into(), Value::Null);
                }
            }
        }

        match &self.dl {
            Some(dl) => {
                let ranking = dl.ranking.as_ref();
                doc.insert(
                    "dl_prediction".into(),
                    ranking
                        .map(|r| json!(r.predicted_class))
                        .unwrap_or_else(|| json!(dl.predicted_label)),
                );
                doc.insert("dl_status".into(), json!(dl.predicted_label));
                doc.insert("dl_confidence".into(), json!(dl.confidence));
                doc.insert(
                    "dl_predicted_class".into(),
                    json!(ranking.map(|r| r.predicted_index)),
                );
                doc.insert("dl_probability".into(), dl.probabilities_value());
                doc.insert(
                    "dl_class_probabilities".into(),
                    ranking
                        .map(|r| {
                            Value::Object(
                                r.classes
                                    .iter()
                                    .map(|c| (c.class.clone(), json!(c.probability)))
                                    .collect(),
                            )
                        })
                        .unwrap_or(Value::Null),
                );
                doc.insert(
                    "dl_ranking".into(),
                    ranking.map(|r| json!(r.classes)).unwrap_or(Value::Null),
                );
            }
            None => {
                for key in [
                    "dl_prediction",
                    "dl_status",
                    "dl_confidence",
                    "dl_predicted_class",
                    "dl_probability",
                    "dl_class_probabilities",
                    "dl_ranking",
                ] {
                    doc.insert(key.into(), Value::Null);
                }
            }
        }

        doc.insert("ml_dl_disagreement".into(), json!(self.ml_dl_disagreement));
        doc.insert("panel_id".into(), json!(self.panel_id));
        doc.insert("timestamp".into(), json!(self.ingested_at.to_rfc3339()));
        doc.insert("topic".into(), json!(self.topic));

        Value::Object(doc)
    }
}

/// Kind of auxiliary device message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEventKind {
    PanelData,
    CleaningStatus,
    Alert,
}

impl DeviceEventKind {
    /// Storage collection the event belongs to
    pub fn collection(&self) -> &'static str {
        match self {
            Self::PanelData => "panel_data",
            Self::CleaningStatus => "cleaning_logs",
            Self::Alert => "alerts",
        }
    }

    /// Key under which the id extracted from the topic is stored
    pub fn id_key(&self) -> &'static str {
        match self {
            Self::PanelData => "panel_id",
            Self::CleaningStatus => "device_id",
            Self::Alert => "alert_id",
        }
    }

    /// Key used to wrap a non-JSON payload; `None` means text is rejected
    fn text_key(&self) -> Option<&'static str> {
        match self {
            Self::PanelData => None,
            Self::CleaningStatus => Some("status"),
            Self::Alert => Some("message"),
        }
    }
}

/// Message from an auxiliary device topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub id: Uuid,
    pub kind: DeviceEventKind,
    pub source_id: String,
    pub topic: String,
    pub received_at: DateTime<Utc>,
    pub body: Map<String, Value>,
}

impl DeviceEvent {
    /// Build an event from a decoded payload
    ///
    /// Returns `None` when the payload shape is not accepted for this kind.
    pub fn from_payload(
        kind: DeviceEventKind,
        source_id: String,
        topic: &str,
        payload: &Payload,
    ) -> Option<Self> {
        let mut body = match payload {
            Payload::Json(Value::Object(map)) => map.clone(),
            Payload::Json(other) => {
                let mut map = Map::new();
                map.insert(kind.text_key()?.to_string(), other.clone());
                map
            }
            Payload::Text(text) => {
                let mut map = Map::new();
                map.insert(kind.text_key()?.to_string(), Value::String(text.clone()));
                map
            }
        };

        if kind == DeviceEventKind::Alert && !body.contains_key("severity") {
            body.insert("severity".into(), json!("info"));
        }

        Some(Self {
            id: Uuid::new_v4(),
            kind,
            source_id,
            topic: topic.to_string(),
            received_at: Utc::now(),
            body,
        })
    }

    /// Flatten into the persisted document layout
    pub fn to_document(&self) -> Value {
        let mut doc = self.body.clone();
        doc.insert("id".into(), json!(self.id));
        doc.insert(self.kind.id_key().into(), json!(self.source_id));
        doc.insert("topic".into(), json!(self.topic));
        doc.insert("timestamp".into(), json!(self.received_at.to_rfc3339()));
        Value::Object(doc)
    }
}

/// Outbound device command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub command: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub params: Map<String, Value>,
}

impl CommandMessage {
    pub fn new(device_id: &str, command: &str, params: Option<Map<String, Value>>) -> Self {
        Self {
            command: command.to_string(),
            device_id: device_id.to_string(),
            timestamp: Utc::now(),
            params: params.unwrap_or_default(),
        }
    }

    /// Payload object: params first, reserved keys on top
    pub fn to_payload(&self) -> Value {
        let mut payload = self.params.clone();
        payload.insert("command".into(), json!(self.command));
        payload.insert("device_id".into(), json!(self.device_id));
        payload.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        Value::Object(payload)
    }
}
