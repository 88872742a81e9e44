//! Content submission intake.
//!
//! Buyers attach content to a reserved region by presenting the region's
//! edit credential together with the image payload, destination link, and
//! hover metadata. Intake validates the request, stores the image, records a
//! versioned submission, runs the moderation pipeline over it, and applies
//! the decision to the region.
//!
//! The decision apply is guarded on `active_submission_id`: when a newer
//! submission lands while a pipeline run is still in flight, the stale run's
//! verdicts stay recorded for the audit trail but the region transition is
//! skipped.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::moderation::pipeline::{Decision, ModerationPipeline};
use crate::moderation::SubmissionContent;
use crate::objstore::{ObjectStore, ObjectStoreError};
use crate::store::{HoverMeta, RegionStatus, Store, StoreError, Submission};

/// Reason recorded on regions rejected by the hash-ban fast path.
const BANNED_CONTENT_REASON: &str = "banned content";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from submission intake.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// No region matches the presented edit credential.
    #[error("unknown edit credential")]
    UnknownCredential,

    /// The region's status does not allow content submission.
    #[error("region is {status} and cannot accept content")]
    NotEditable {
        /// The region's current status.
        status: RegionStatus,
    },

    /// Image payload is empty.
    #[error("image payload is empty")]
    EmptyImage,

    /// Image payload exceeds the configured byte limit.
    #[error("image is {size} bytes, limit is {max}")]
    ImageTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Destination link is not an absolute http(s) URL.
    #[error("invalid destination link {url:?}")]
    InvalidLink {
        /// The rejected link.
        url: String,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Object storage failure.
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
}

// ---------------------------------------------------------------------------
// Intake
// ---------------------------------------------------------------------------

/// A submission request as received from the buyer.
#[derive(Debug)]
pub struct SubmissionRequest {
    /// Edit credential minted at reservation time.
    pub edit_credential: String,
    /// Image payload bytes.
    pub image: Vec<u8>,
    /// Destination link.
    pub link_url: String,
    /// Hover card metadata.
    pub hover: HoverMeta,
}

/// What intake returns to the buyer.
#[derive(Debug)]
pub struct SubmissionReceipt {
    /// The recorded submission's id.
    pub submission_id: Uuid,
    /// Per-region submission version.
    pub version: i64,
    /// Content fingerprint.
    pub fingerprint: String,
    /// The region status after the decision was applied.
    pub region_status: RegionStatus,
}

/// Orchestrates content intake end to end.
pub struct SubmissionIntake {
    store: Arc<Store>,
    objects: Arc<ObjectStore>,
    pipeline: Arc<ModerationPipeline>,
    max_image_bytes: usize,
}

impl SubmissionIntake {
    /// Build the intake surface.
    pub fn new(
        store: Arc<Store>,
        objects: Arc<ObjectStore>,
        pipeline: Arc<ModerationPipeline>,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            store,
            objects,
            pipeline,
            max_image_bytes,
        }
    }

    /// Accept content for a region and moderate it.
    ///
    /// On success the region is `approved`, `pending_review`, or `rejected`
    /// per the moderation decision, reflected in the receipt. When a newer
    /// submission superseded this one mid-flight, the receipt reports the
    /// region's current status untouched by this run.
    ///
    /// # Errors
    ///
    /// Returns a validation variant when the request is malformed, or
    /// [`SubmissionError::Store`]/[`SubmissionError::Objects`] on
    /// persistence failure. Checker failures never surface here.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let region = self
            .store
            .region_by_credential(&request.edit_credential)
            .await?
            .ok_or(SubmissionError::UnknownCredential)?;
        if !matches!(
            region.status,
            RegionStatus::Draft | RegionStatus::PendingReview
        ) {
            return Err(SubmissionError::NotEditable {
                status: region.status,
            });
        }
        validate_image(&request.image, self.max_image_bytes)?;
        validate_link(&request.link_url)?;

        let object_key = ObjectStore::mint_key();
        self.objects.put(&object_key, &request.image).await?;

        let content = SubmissionContent::new(request.image, request.link_url.clone());
        let submission = self
            .store
            .create_submission(Submission {
                id: Uuid::new_v4(),
                region_id: region.id,
                object_key: object_key.clone(),
                fingerprint: content.fingerprint.clone(),
                link_url: request.link_url,
                hover: request.hover,
                version: 0, // assigned by the store
                created_at: None,
            })
            .await?;
        info!(region = %region.id, submission = %submission.id, version = submission.version, "submission recorded");

        let outcome = self.pipeline.evaluate(submission.id, &content).await?;
        let (to, reason) = match outcome.decision {
            Decision::AutoApprove => (RegionStatus::Approved, None),
            Decision::PendingReview => (RegionStatus::PendingReview, None),
            Decision::Reject => (
                RegionStatus::Rejected,
                Some(BANNED_CONTENT_REASON.to_owned()),
            ),
        };

        let applied = self
            .store
            .apply_moderation(region.id, submission.id, to, reason)
            .await?;
        if !applied {
            warn!(region = %region.id, submission = %submission.id, "submission superseded, decision not applied");
        }
        if applied && to == RegionStatus::Rejected {
            // Banned content is not kept around.
            self.objects.delete(&object_key).await?;
        }

        let region_status = if applied {
            to
        } else {
            self.store
                .region(region.id)
                .await?
                .map_or(region.status, |r| r.status)
        };

        Ok(SubmissionReceipt {
            submission_id: submission.id,
            version: submission.version,
            fingerprint: outcome.fingerprint,
            region_status,
        })
    }
}

fn validate_image(image: &[u8], max: usize) -> Result<(), SubmissionError> {
    if image.is_empty() {
        return Err(SubmissionError::EmptyImage);
    }
    if image.len() > max {
        return Err(SubmissionError::ImageTooLarge {
            size: image.len(),
            max,
        });
    }
    Ok(())
}

fn validate_link(link_url: &str) -> Result<(), SubmissionError> {
    let parsed = Url::parse(link_url).map_err(|_| SubmissionError::InvalidLink {
        url: link_url.to_owned(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(SubmissionError::InvalidLink {
            url: link_url.to_owned(),
        });
    }
    Ok(())
}
