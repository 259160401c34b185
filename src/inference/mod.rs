//! Panel soiling inference
//!
//! - [`features`] - tabular feature vector derived from a reading
//! - [`predictor`] - stage-1/stage-2 predictor traits
//! - [`providers`] - HTTP model-server predictors
//! - [`pipeline`] - the ingestion pipeline tying predictors and storage together

pub mod features;
pub mod pipeline;
pub mod predictor;
pub mod providers;

pub use features::{FeatureVector, EPSILON, FEATURE_NAMES};
pub use pipeline::{DropReason, InferencePipeline, IngestOutcome};
pub use predictor::{DisabledPredictor, ImagePredictor, PredictorError, TabularPredictor};
pub use providers::{HttpImagePredictor, HttpTabularPredictor};
