//! Label detection checker.
//!
//! Sends the image to a vision endpoint that detects unsafe-content labels
//! with confidences on a 0..=100 scale. Labels below the configured floor are
//! ignored; anything at or above it flags the submission.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderEndpoint;
use crate::moderation::{
    check_http_response, CheckKind, CheckOutcome, CheckerError, SignalChecker, SubmissionContent,
};

/// Detects unsafe-content labels in the image.
pub struct LabelDetectChecker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    min_confidence: f64,
}

impl LabelDetectChecker {
    /// Build a checker for the given vision endpoint.
    ///
    /// `min_confidence` is the 0..=100 floor below which detected labels are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerError::Request`] when the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: &ProviderEndpoint, min_confidence: f64) -> Result<Self, CheckerError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            min_confidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default, rename = "ModerationLabels")]
    labels: Vec<DetectedLabel>,
}

#[derive(Debug, Deserialize)]
struct DetectedLabel {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Confidence")]
    confidence: f64,
}

#[async_trait]
impl SignalChecker for LabelDetectChecker {
    fn kind(&self) -> CheckKind {
        CheckKind::LabelDetect
    }

    async fn check(&self, content: &SubmissionContent) -> Result<CheckOutcome, CheckerError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&content.image);
        let request = serde_json::json!({
            "Image": { "Bytes": image_b64 },
            "MinConfidence": self.min_confidence,
        });

        let response = self
            .client
            .post(format!("{}/detect-moderation-labels", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: DetectResponse = serde_json::from_str(&body)
            .map_err(|e| CheckerError::Parse(format!("detect response: {e}")))?;

        let hits: Vec<&DetectedLabel> = parsed
            .labels
            .iter()
            .filter(|label| label.confidence >= self.min_confidence)
            .collect();
        // Provider confidences are 0..=100; verdicts carry 0..=1.
        let confidence = hits
            .iter()
            .map(|label| label.confidence / 100.0)
            .fold(None, |acc: Option<f64>, c| {
                Some(acc.map_or(c, |a| a.max(c)))
            });
        let categories = hits.iter().map(|label| label.name.clone()).collect();

        Ok(CheckOutcome {
            flagged: confidence.is_some(),
            confidence,
            categories,
            raw: serde_json::from_str(&body)
                .map_err(|e| CheckerError::Parse(format!("detect raw body: {e}")))?,
        })
    }
}
