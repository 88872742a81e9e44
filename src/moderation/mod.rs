//! Content-safety checking.
//!
//! Defines the [`SignalChecker`] trait and the shared outcome types used by
//! all checker implementations, plus the content fingerprint.
//!
//! Four checkers are implemented:
//! - [`image_policy::ImagePolicyChecker`] — category classification provider
//! - [`label_detect::LabelDetectChecker`] — object/label detection provider
//! - [`ocr_text::OcrTextChecker`] — text extraction plus keyword matching
//! - [`url_scan::UrlScanChecker`] — local link heuristics, no network
//!
//! The [`pipeline::ModerationPipeline`] fans out over the set and aggregates
//! their verdicts into a single decision.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod image_policy;
pub mod label_detect;
pub mod ocr_text;
pub mod pipeline;
pub mod url_scan;

pub use crate::store::CheckKind;

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// The immutable content a submission is checked against.
#[derive(Debug, Clone)]
pub struct SubmissionContent {
    /// Canonical image payload bytes.
    pub image: Vec<u8>,
    /// Destination link.
    pub link_url: String,
    /// SHA-256 fingerprint of the image payload (lowercase hex).
    pub fingerprint: String,
}

impl SubmissionContent {
    /// Build content, computing the fingerprint from the image bytes.
    pub fn new(image: Vec<u8>, link_url: impl Into<String>) -> Self {
        let fingerprint = fingerprint(&image);
        Self {
            image,
            link_url: link_url.into(),
            fingerprint,
        }
    }
}

/// SHA-256 content fingerprint over canonical content bytes, lowercase hex.
///
/// Content-addressed: used for ban lookups and dedup.
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// The result of one checker run, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Whether the checker flagged the content.
    pub flagged: bool,
    /// Normalised confidence in 0..=1, when the checker reports one.
    pub confidence: Option<f64>,
    /// Category tags attached by the checker.
    pub categories: Vec<String>,
    /// Raw provider result for reviewer display.
    pub raw: serde_json::Value,
}

impl CheckOutcome {
    /// A clean, unflagged outcome with the given raw result.
    pub fn clean(raw: serde_json::Value) -> Self {
        Self {
            flagged: false,
            confidence: None,
            categories: Vec::new(),
            raw,
        }
    }

    /// The fail-open outcome for a provider failure: not flagged, with an
    /// error marker preserved in the raw result so the recovery is auditable.
    pub fn fail_open(error: &str) -> Self {
        Self::clean(serde_json::json!({ "error": error }))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by checker providers.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Registry lookup needed by the checker failed.
    #[error("ban registry lookup failed: {0}")]
    Registry(#[from] crate::store::StoreError),
}

// ---------------------------------------------------------------------------
// HTTP helpers (shared by the provider-backed checkers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `CheckerError::Request` on transport failure,
/// `CheckerError::HttpStatus` on non-2xx.
pub(crate) async fn check_http_response(
    response: reqwest::Response,
) -> Result<String, CheckerError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(CheckerError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse, redact, and truncate a provider error body before it reaches
/// logs or stored verdicts.
fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-[A-Za-z0-9]{32,}",
        r"(?i)bearer\s+[A-Za-z0-9_\-\.]{16,}",
        r"AKIA[A-Z0-9]{16}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One independent content-safety check.
///
/// Implementations must be `Send + Sync`: the pipeline fans them out as
/// concurrent tasks sharing only the immutable input content.
#[async_trait]
pub trait SignalChecker: Send + Sync {
    /// Which check this is, for verdict attribution.
    fn kind(&self) -> CheckKind;

    /// Run the check against the submitted content.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerError`] on provider, network, or parse failure. The
    /// pipeline recovers such failures as fail-open verdicts; checkers never
    /// need to do that themselves.
    async fn check(&self, content: &SubmissionContent) -> Result<CheckOutcome, CheckerError>;
}
