//! Image policy checker.
//!
//! Sends the image to an external moderation endpoint that classifies it
//! against unsafe-content categories and reports a flagged/clean verdict per
//! category with scores.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderEndpoint;
use crate::moderation::{
    check_http_response, CheckKind, CheckOutcome, CheckerError, SignalChecker, SubmissionContent,
};

/// Classifies image content against the provider's policy categories.
pub struct ImagePolicyChecker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ImagePolicyChecker {
    /// Build a checker for the given provider endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerError::Request`] when the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: &ProviderEndpoint) -> Result<Self, CheckerError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    category_scores: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
impl SignalChecker for ImagePolicyChecker {
    fn kind(&self) -> CheckKind {
        CheckKind::ImagePolicy
    }

    async fn check(&self, content: &SubmissionContent) -> Result<CheckOutcome, CheckerError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&content.image);
        let request = serde_json::json!({
            "model": "omni-moderation-latest",
            "input": [{
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{image_b64}") },
            }],
        });

        let response = self
            .client
            .post(format!("{}/moderations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: ModerationResponse = serde_json::from_str(&body)
            .map_err(|e| CheckerError::Parse(format!("moderation response: {e}")))?;
        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| CheckerError::Parse("moderation response had no results".into()))?;

        // Only the categories the provider actually flagged are surfaced.
        let categories: Vec<String> = result
            .categories
            .iter()
            .filter(|(_, hit)| hit.as_bool().unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect();
        let confidence = categories
            .iter()
            .filter_map(|name| result.category_scores.get(name).and_then(|s| s.as_f64()))
            .fold(None, |acc: Option<f64>, score| {
                Some(acc.map_or(score, |a| a.max(score)))
            });

        Ok(CheckOutcome {
            flagged: result.flagged,
            confidence,
            categories,
            raw: serde_json::from_str(&body)
                .map_err(|e| CheckerError::Parse(format!("moderation raw body: {e}")))?,
        })
    }
}
