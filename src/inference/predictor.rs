//! Predictor seams consumed by the inference pipeline
//!
//! Both stages are black boxes behind async traits. A predictor that cannot
//! answer returns [`PredictorError`]; the pipeline treats every error as
//! "unavailable" and degrades the record instead of failing ingestion.

use super::features::FeatureVector;
use crate::protocol::{
    ClassRanking, CleanlinessLabel, PredictionError, PredictionResult, PredictionStage,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the image model class that means "no soiling"
pub const CLEAN_CLASS: &str = "clean";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictorError {
    #[error("Predictor not configured: {0}")]
    NotConfigured(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<PredictionError> for PredictorError {
    fn from(e: PredictionError) -> Self {
        PredictorError::InvalidResponse(e.to_string())
    }
}

/// Stage 1: fast classifier over sensor features
#[async_trait]
pub trait TabularPredictor: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(&self, features: &FeatureVector) -> Result<PredictionResult, PredictorError>;
}

/// Stage 2: image classifier confirming a "dirty" verdict
#[async_trait]
pub trait ImagePredictor: Send + Sync {
    fn name(&self) -> &str;

    /// `image` is the reference exactly as received in the payload
    async fn predict(&self, image: &str) -> Result<PredictionResult, PredictorError>;
}

/// Predictor for a stage with no model configured
#[derive(Debug, Clone)]
pub struct DisabledPredictor {
    stage: PredictionStage,
}

impl DisabledPredictor {
    pub fn new(stage: PredictionStage) -> Self {
        Self { stage }
    }

    fn unavailable(&self) -> PredictorError {
        let stage = match self.stage {
            PredictionStage::Ml => "ml",
            PredictionStage::Dl => "dl",
        };
        PredictorError::NotConfigured(format!("no {stage} model endpoint"))
    }
}

#[async_trait]
impl TabularPredictor for DisabledPredictor {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn predict(&self, _features: &FeatureVector) -> Result<PredictionResult, PredictorError> {
        Err(self.unavailable())
    }
}

#[async_trait]
impl ImagePredictor for DisabledPredictor {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn predict(&self, _image: &str) -> Result<PredictionResult, PredictorError> {
        Err(self.unavailable())
    }
}

/// Build a stage-1 result from a label and clean/dirty probabilities
///
/// Confidence defaults to the probability of the predicted label.
pub fn tabular_result(
    label: CleanlinessLabel,
    confidence: Option<f64>,
    probabilities: BTreeMap<CleanlinessLabel, f64>,
) -> Result<PredictionResult, PredictorError> {
    let confidence = confidence
        .or_else(|| probabilities.get(&label).copied())
        .ok_or_else(|| {
            PredictorError::InvalidResponse(format!("no confidence for label {label}"))
        })?;
    Ok(PredictionResult::new(
        PredictionStage::Ml,
        label,
        confidence,
        probabilities,
    )?)
}

/// Build a stage-2 result from per-class probabilities
///
/// The top class decides the status: the clean class means clean, every
/// other class is a kind of soiling. Clean/dirty probabilities aggregate
/// the fine-grained classes the same way.
pub fn image_result(
    class_probabilities: impl IntoIterator<Item = (String, f64)>,
    predicted_index: Option<usize>,
) -> Result<PredictionResult, PredictorError> {
    let ranking = ClassRanking::from_probabilities(class_probabilities, predicted_index)
        .ok_or_else(|| PredictorError::InvalidResponse("empty class probabilities".into()))?;

    let is_clean = |class: &str| class.eq_ignore_ascii_case(CLEAN_CLASS);
    let clean: f64 = ranking
        .classes
        .iter()
        .filter(|c| is_clean(&c.class))
        .map(|c| c.probability)
        .sum();
    let dirty: f64 = ranking
        .classes
        .iter()
        .filter(|c| !is_clean(&c.class))
        .map(|c| c.probability)
        .sum();

    let label = if is_clean(&ranking.predicted_class) {
        CleanlinessLabel::Clean
    } else {
        CleanlinessLabel::Dirty
    };
    let confidence = ranking
        .probability_of(&ranking.predicted_class)
        .unwrap_or_default();

    let mut probabilities = BTreeMap::new();
    probabilities.insert(CleanlinessLabel::Clean, clean.min(1.0));
    probabilities.insert(CleanlinessLabel::Dirty, dirty.min(1.0));

    Ok(PredictionResult::new(PredictionStage::Dl, label, confidence, probabilities)?.with_ranking(ranking))
}
