//! Moderation pipeline.
//!
//! Orders the checks around a submission and aggregates their verdicts into
//! one decision:
//!
//! 1. hash-ban fast path: a banned fingerprint is a hard reject and no
//!    checker runs at all
//! 2. domain-ban gate: a banned destination domain records a flagged verdict
//!    but the full checker set still runs, so reviewers see the complete
//!    signal picture
//! 3. checker fan-out: every configured [`SignalChecker`] runs concurrently
//!    under a per-checker timeout; provider failures, timeouts, and panics
//!    recover fail-open as unflagged verdicts carrying an error marker
//!
//! Every verdict is persisted before the decision is returned. The decision
//! is `AutoApprove` exactly when no persisted verdict is flagged, otherwise
//! `PendingReview` (or `Reject` on the fast path).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bans::BanRegistry;
use crate::config::ModerationConfig;
use crate::moderation::image_policy::ImagePolicyChecker;
use crate::moderation::label_detect::LabelDetectChecker;
use crate::moderation::ocr_text::OcrTextChecker;
use crate::moderation::url_scan::UrlScanChecker;
use crate::moderation::{CheckKind, CheckOutcome, CheckerError, SignalChecker, SubmissionContent};
use crate::store::{Store, StoreError, VerdictRecord};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Aggregate decision for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No check flagged anything; the submission may go live immediately.
    AutoApprove,
    /// At least one check flagged; a human reviewer decides.
    PendingReview,
    /// Banned content; rejected outright without review.
    Reject,
}

/// The pipeline's result for one submission.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// The aggregate decision.
    pub decision: Decision,
    /// Content fingerprint the decision was made against.
    pub fingerprint: String,
    /// Every verdict recorded for the submission, in persistence order.
    pub verdicts: Vec<(CheckKind, CheckOutcome)>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs the configured checker set over submitted content.
pub struct ModerationPipeline {
    store: Arc<Store>,
    bans: BanRegistry,
    checkers: Vec<Arc<dyn SignalChecker>>,
    checker_timeout: Duration,
}

impl ModerationPipeline {
    /// Build a pipeline over the given checker set.
    pub fn new(
        store: Arc<Store>,
        bans: BanRegistry,
        checkers: Vec<Arc<dyn SignalChecker>>,
        checker_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bans,
            checkers,
            checker_timeout,
        }
    }

    /// Build the production checker set from configuration.
    ///
    /// The URL scan always runs; provider-backed checkers join the set only
    /// when their endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns [`CheckerError`] when a configured provider client cannot be
    /// constructed.
    pub fn from_config(
        store: Arc<Store>,
        bans: BanRegistry,
        config: &ModerationConfig,
    ) -> Result<Self, CheckerError> {
        let mut checkers: Vec<Arc<dyn SignalChecker>> =
            vec![Arc::new(UrlScanChecker::new(bans.clone()))];
        if let Some(endpoint) = &config.image_policy {
            checkers.push(Arc::new(ImagePolicyChecker::new(endpoint)?));
        }
        if let Some(endpoint) = &config.vision {
            checkers.push(Arc::new(LabelDetectChecker::new(
                endpoint,
                config.min_label_confidence,
            )?));
            checkers.push(Arc::new(OcrTextChecker::new(endpoint, bans.clone())?));
        }
        Ok(Self::new(
            store,
            bans,
            checkers,
            Duration::from_secs(config.checker_timeout_secs),
        ))
    }

    /// Check one submission's content and persist a verdict per signal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only on registry or persistence failure.
    /// Checker failures never surface here; they are recovered as fail-open
    /// verdicts.
    pub async fn evaluate(
        &self,
        submission_id: Uuid,
        content: &SubmissionContent,
    ) -> Result<PipelineOutcome, StoreError> {
        // Fast path: known-bad content is rejected before any checker runs.
        if self.bans.is_hash_banned(&content.fingerprint).await? {
            info!(%submission_id, fingerprint = %content.fingerprint, "content hash is banned, rejecting");
            let outcome = CheckOutcome {
                flagged: true,
                confidence: Some(1.0),
                categories: vec!["banned_content".to_string()],
                raw: serde_json::json!({ "fingerprint": content.fingerprint }),
            };
            self.persist(submission_id, CheckKind::HashBan, &outcome)
                .await?;
            return Ok(PipelineOutcome {
                decision: Decision::Reject,
                fingerprint: content.fingerprint.clone(),
                verdicts: vec![(CheckKind::HashBan, outcome)],
            });
        }

        let mut verdicts: Vec<(CheckKind, CheckOutcome)> = Vec::new();

        // Domain gate: flags but does not short-circuit, so reviewers get
        // the full signal picture alongside the ban hit.
        if let Some(domain) = self.bans.matches_banned_domain(&content.link_url).await? {
            warn!(%submission_id, %domain, "destination domain is banned");
            let outcome = CheckOutcome {
                flagged: true,
                confidence: Some(1.0),
                categories: vec!["banned_domain".to_string()],
                raw: serde_json::json!({ "url": content.link_url, "banned_domain": domain }),
            };
            self.persist(submission_id, CheckKind::DomainBan, &outcome)
                .await?;
            verdicts.push((CheckKind::DomainBan, outcome));
        }

        for (kind, outcome) in self.fan_out(content).await {
            self.persist(submission_id, kind, &outcome).await?;
            verdicts.push((kind, outcome));
        }

        let decision = if verdicts.iter().any(|(_, outcome)| outcome.flagged) {
            Decision::PendingReview
        } else {
            Decision::AutoApprove
        };
        info!(%submission_id, ?decision, verdicts = verdicts.len(), "moderation complete");

        Ok(PipelineOutcome {
            decision,
            fingerprint: content.fingerprint.clone(),
            verdicts,
        })
    }

    /// Run every checker concurrently, each under the per-checker timeout.
    ///
    /// Failures, timeouts, and panics come back as fail-open outcomes; this
    /// never errors. The kind is held outside the spawned task so even a
    /// panicked checker leaves an error-marker verdict behind.
    async fn fan_out(&self, content: &SubmissionContent) -> Vec<(CheckKind, CheckOutcome)> {
        let mut tasks = Vec::with_capacity(self.checkers.len());
        for checker in &self.checkers {
            let kind = checker.kind();
            let checker = Arc::clone(checker);
            let content = content.clone();
            let timeout = self.checker_timeout;
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, checker.check(&content)).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(error)) => {
                        warn!(check = kind.as_str(), %error, "checker failed, failing open");
                        CheckOutcome::fail_open(&error.to_string())
                    }
                    Err(_) => {
                        warn!(check = kind.as_str(), ?timeout, "checker timed out, failing open");
                        CheckOutcome::fail_open(&format!("timed out after {}s", timeout.as_secs()))
                    }
                }
            });
            tasks.push((kind, handle));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (kind, handle) in tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(check = kind.as_str(), %error, "checker task panicked, failing open");
                    CheckOutcome::fail_open("checker panicked")
                }
            };
            results.push((kind, outcome));
        }
        // Await order is spawn order; keep verdict order deterministic.
        results.sort_by_key(|(kind, _)| kind.as_str());
        results
    }

    async fn persist(
        &self,
        submission_id: Uuid,
        kind: CheckKind,
        outcome: &CheckOutcome,
    ) -> Result<(), StoreError> {
        debug!(%submission_id, check = kind.as_str(), flagged = outcome.flagged, "recording verdict");
        self.store
            .record_verdict(VerdictRecord {
                id: Uuid::new_v4(),
                submission_id,
                kind,
                flagged: outcome.flagged,
                confidence: outcome.confidence,
                categories: outcome.categories.clone(),
                raw: outcome.raw.clone(),
                checked_at: None,
            })
            .await
    }
}
