//! HTTP model-server predictors
//!
//! # Tabular endpoint
//!
//! ```json
//! // request
//! { "features": [31.5, 40.0, 820.0, 142, 136, 125, 134.33, 7.04, 0.958, 0.880],
//!   "feature_names": ["temperature", "humidity", "light", "R", "G", "B",
//!                     "RGB_mean", "RGB_std", "G_over_R", "B_over_R"] }
//! // response; "prediction" may also be 0 (clean) or 1 (dirty)
//! { "prediction": "dirty", "confidence": 0.87,
//!   "probabilities": { "clean": 0.13, "dirty": 0.87 } }
//! ```
//!
//! # Image endpoint
//!
//! ```json
//! // request
//! { "image": "<reference exactly as received>" }
//! // response
//! { "class_probabilities": { "Clean": 0.05, "Dusty": 0.81, "Snow-Covered": 0.14 },
//!   "predicted_index": 1 }
//! ```

use super::features::{FeatureVector, FEATURE_NAMES};
use super::predictor::{
    image_result, tabular_result, DisabledPredictor, ImagePredictor, PredictorError,
    TabularPredictor,
};
use crate::config::PredictorEndpoint;
use crate::protocol::{CleanlinessLabel, PredictionResult, PredictionStage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Stage-1 predictor for the configured endpoint, or a disabled one
pub fn tabular_predictor(config: &PredictorEndpoint) -> Arc<dyn TabularPredictor> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(HttpTabularPredictor::new(
            endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        None => Arc::new(DisabledPredictor::new(PredictionStage::Ml)),
    }
}

/// Stage-2 predictor for the configured endpoint, or a disabled one
pub fn image_predictor(config: &PredictorEndpoint) -> Arc<dyn ImagePredictor> {
    match &config.endpoint {
        Some(endpoint) => Arc::new(HttpImagePredictor::new(
            endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        None => Arc::new(DisabledPredictor::new(PredictionStage::Dl)),
    }
}

/// POST `body` and decode the JSON response
async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    body: &Req,
) -> Result<Resp, PredictorError>
where
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    debug!(url = %url, "Calling model server");

    let response = client
        .post(url)
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                PredictorError::Timeout(timeout.as_millis() as u64)
            } else {
                PredictorError::RequestFailed(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(PredictorError::RequestFailed(format!("HTTP {status}: {text}")));
    }

    response
        .json::<Resp>()
        .await
        .map_err(|e| PredictorError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Serialize)]
struct TabularRequest<'a> {
    features: &'a [f64; 10],
    feature_names: [&'static str; 10],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LabelValue {
    Index(u8),
    Name(String),
}

impl LabelValue {
    fn into_label(self) -> Result<CleanlinessLabel, PredictorError> {
        match self {
            LabelValue::Index(0) => Ok(CleanlinessLabel::Clean),
            LabelValue::Index(1) => Ok(CleanlinessLabel::Dirty),
            LabelValue::Index(other) => Err(PredictorError::InvalidResponse(format!(
                "unknown class index {other}"
            ))),
            LabelValue::Name(name) => CleanlinessLabel::parse(&name).ok_or_else(|| {
                PredictorError::InvalidResponse(format!("unknown label '{name}'"))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TabularResponse {
    prediction: LabelValue,
    confidence: Option<f64>,
    #[serde(default)]
    probabilities: Option<HashMap<String, f64>>,
}

pub struct HttpTabularPredictor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTabularPredictor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TabularPredictor for HttpTabularPredictor {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn predict(&self, features: &FeatureVector) -> Result<PredictionResult, PredictorError> {
        let request = TabularRequest {
            features: features.values(),
            feature_names: FEATURE_NAMES,
        };
        let response: TabularResponse =
            post_json(&self.client, &self.endpoint, self.timeout, &request).await?;

        let label = response.prediction.into_label()?;
        let mut probabilities = BTreeMap::new();
        for (name, value) in response.probabilities.unwrap_or_default() {
            if let Some(label) = CleanlinessLabel::parse(&name) {
                probabilities.insert(label, value);
            }
        }
        tabular_result(label, response.confidence, probabilities)
    }
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    class_probabilities: HashMap<String, f64>,
    predicted_index: Option<usize>,
}

pub struct HttpImagePredictor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpImagePredictor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ImagePredictor for HttpImagePredictor {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn predict(&self, image: &str) -> Result<PredictionResult, PredictorError> {
        let response: ImageResponse =
            post_json(&self.client, &self.endpoint, self.timeout, &ImageRequest { image }).await?;
        image_result(response.class_probabilities, response.predicted_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorReading;
    use serde_json::{json, Map};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn features() -> FeatureVector {
        FeatureVector::from_reading(&SensorReading {
            temperature: 31.5,
            humidity: 40.0,
            light: 820.0,
            r: 142,
            g: 136,
            b: 125,
            image: None,
            extra: Map::new(),
        })
    }

    #[tokio::test]
    async fn test_tabular_prediction_by_name() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ml"))
            .and(body_partial_json(json!({"feature_names": FEATURE_NAMES})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prediction": "dirty",
                "probabilities": {"clean": 0.13, "dirty": 0.87}
            })))
            .mount(&server)
            .await;
        let predictor =
            HttpTabularPredictor::new(format!("{}/ml", server.uri()), Duration::from_secs(5));

        // Act
        let result = predictor.predict(&features()).await.unwrap();

        // Assert
        assert_eq!(result.predicted_label, CleanlinessLabel::Dirty);
        assert_eq!(result.confidence, 0.87);
        assert_eq!(result.per_class_probabilities[&CleanlinessLabel::Clean], 0.13);
    }

    #[tokio::test]
    async fn test_tabular_prediction_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prediction": 0,
                "confidence": 0.91
            })))
            .mount(&server)
            .await;
        let predictor = HttpTabularPredictor::new(server.uri(), Duration::from_secs(5));

        let result = predictor.predict(&features()).await.unwrap();

        assert_eq!(result.predicted_label, CleanlinessLabel::Clean);
        assert_eq!(result.confidence, 0.91);
        assert!(result.per_class_probabilities.is_empty());
    }

    #[tokio::test]
    async fn test_tabular_server_error_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model not loaded"))
            .mount(&server)
            .await;
        let predictor = HttpTabularPredictor::new(server.uri(), Duration::from_secs(5));

        let result = predictor.predict(&features()).await;

        assert!(matches!(result, Err(PredictorError::RequestFailed(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_tabular_malformed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prediction": "muddy"})))
            .mount(&server)
            .await;
        let predictor = HttpTabularPredictor::new(server.uri(), Duration::from_secs(5));

        let result = predictor.predict(&features()).await;

        assert!(matches!(result, Err(PredictorError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_tabular_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"prediction": 1, "confidence": 0.9})),
            )
            .mount(&server)
            .await;
        let predictor = HttpTabularPredictor::new(server.uri(), Duration::from_millis(50));

        let result = predictor.predict(&features()).await;

        assert_eq!(result, Err(PredictorError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_image_prediction_ranking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dl"))
            .and(body_partial_json(json!({"image": "https://cdn.example.com/p1.jpg"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "class_probabilities": {"Clean": 0.05, "Dusty": 0.81, "Snow-Covered": 0.14},
                "predicted_index": 1
            })))
            .mount(&server)
            .await;
        let predictor =
            HttpImagePredictor::new(format!("{}/dl", server.uri()), Duration::from_secs(5));

        let result = predictor
            .predict("https://cdn.example.com/p1.jpg")
            .await
            .unwrap();

        assert_eq!(result.stage, PredictionStage::Dl);
        assert_eq!(result.predicted_label, CleanlinessLabel::Dirty);
        let ranking = result.ranking.unwrap();
        assert_eq!(ranking.predicted_class, "Dusty");
        let order: Vec<_> = ranking.classes.iter().map(|c| c.class.as_str()).collect();
        assert_eq!(order, vec!["Dusty", "Snow-Covered", "Clean"]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let predictor =
            HttpImagePredictor::new("http://127.0.0.1:1/dl", Duration::from_millis(500));

        let result = predictor.predict("img").await;

        assert!(matches!(
            result,
            Err(PredictorError::RequestFailed(_)) | Err(PredictorError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_factories_respect_endpoint() {
        let disabled = tabular_predictor(&PredictorEndpoint::default());
        assert_eq!(disabled.name(), "disabled");

        let configured = image_predictor(&PredictorEndpoint {
            endpoint: Some("http://models.local/dl".into()),
            timeout_ms: 1000,
        });
        assert_eq!(configured.name(), "http://models.local/dl");
    }
}
