//! OCR text checker.
//!
//! Extracts text rendered inside the image via a vision endpoint, then
//! matches the extracted lines against the banned-keyword registry plus a
//! built-in suspicious-term list. The network call happens once; the keyword
//! match is local.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::bans::BanRegistry;
use crate::config::ProviderEndpoint;
use crate::moderation::{
    check_http_response, CheckKind, CheckOutcome, CheckerError, SignalChecker, SubmissionContent,
};

/// Terms that flag extracted text regardless of registry state.
const SUSPICIOUS_TERMS: &[&str] = &[
    "porn", "xxx", "sex", "adult", "casino", "bitcoin", "crypto",
];

/// Flags submissions whose embedded text contains banned or suspicious terms.
pub struct OcrTextChecker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bans: BanRegistry,
}

impl OcrTextChecker {
    /// Build a checker for the given vision endpoint and ban registry.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerError::Request`] when the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: &ProviderEndpoint, bans: BanRegistry) -> Result<Self, CheckerError> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            api_key: endpoint.api_key.clone(),
            bans,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TextResponse {
    #[serde(default, rename = "TextDetections")]
    detections: Vec<TextDetection>,
}

#[derive(Debug, Deserialize)]
struct TextDetection {
    #[serde(rename = "DetectedText")]
    text: String,
    #[serde(rename = "Type")]
    kind: String,
}

/// Terms from `terms` found in `text` (both matched case-insensitively).
fn matched_terms(text: &str, terms: &[String]) -> Vec<String> {
    let haystack = text.to_lowercase();
    terms
        .iter()
        .filter(|term| !term.is_empty() && haystack.contains(term.as_str()))
        .cloned()
        .collect()
}

#[async_trait]
impl SignalChecker for OcrTextChecker {
    fn kind(&self) -> CheckKind {
        CheckKind::OcrText
    }

    async fn check(&self, content: &SubmissionContent) -> Result<CheckOutcome, CheckerError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&content.image);
        let request = serde_json::json!({
            "Image": { "Bytes": image_b64 },
        });

        let response = self
            .client
            .post(format!("{}/detect-text", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: TextResponse = serde_json::from_str(&body)
            .map_err(|e| CheckerError::Parse(format!("text response: {e}")))?;
        // LINE detections cover the WORD ones; keep lines only.
        let extracted = parsed
            .detections
            .iter()
            .filter(|d| d.kind.eq_ignore_ascii_case("LINE"))
            .map(|d| d.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut terms: Vec<String> = self.bans.banned_keywords().await?;
        terms.extend(SUSPICIOUS_TERMS.iter().map(|t| (*t).to_string()));
        terms.sort();
        terms.dedup();

        let hits = matched_terms(&extracted, &terms);
        let flagged = !hits.is_empty();

        Ok(CheckOutcome {
            flagged,
            confidence: flagged.then_some(1.0),
            categories: hits,
            raw: serde_json::json!({
                "extracted_text": extracted,
                "provider": serde_json::from_str::<serde_json::Value>(&body)
                    .map_err(|e| CheckerError::Parse(format!("text raw body: {e}")))?,
            }),
        })
    }
}
