//! Region lifecycle administration.
//!
//! Regions move `draft -> pending_review -> approved | rejected`, and
//! approved regions can later be taken down to `removed_after_publish`.
//! Automatic transitions are driven by moderation; the transitions here are
//! the administrative ones, each gated on a role check, a status
//! precondition, and an audit record committed atomically with the change.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::store::{
    AdminActionKind, AdminActionRecord, AdminDecision, Region, RegionStatus, Store, StoreError,
    TargetKind,
};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Role that may decide moderation outcomes.
pub const ROLE_MODERATOR: &str = "moderator";
/// Role that may do anything, including takedowns and refunds.
pub const ROLE_ADMIN: &str = "admin";

/// The authenticated identity performing an administrative action.
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    /// Actor identity recorded in the audit trail.
    pub email: String,
    /// Assigned role.
    pub role: String,
}

impl AdminIdentity {
    /// Build an identity.
    pub fn new(email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: role.into(),
        }
    }

    /// Whether this identity satisfies `required_role`.
    ///
    /// The `admin` role satisfies every requirement.
    pub fn has_role(&self, required_role: &str) -> bool {
        self.role == required_role || self.role == ROLE_ADMIN
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Actor's role does not permit the action.
    #[error("role {actual:?} may not perform this action (requires {required:?})")]
    Forbidden {
        /// Role the action requires.
        required: &'static str,
        /// Role the actor holds.
        actual: String,
    },

    /// Storage failure, including status precondition violations.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

/// Administrative transitions over the region lifecycle.
pub struct RegionAdmin {
    store: Arc<Store>,
}

impl RegionAdmin {
    /// Build an admin surface over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Approve a region held for review, publishing it to the canvas.
    ///
    /// Requires the `moderator` role. The region must be `pending_review`;
    /// `approved_at` is stamped on the transition.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Forbidden`] on a role mismatch, or a
    /// [`StoreError::StatusPrecondition`] via `Store` when the region is not
    /// `pending_review`.
    pub async fn approve(
        &self,
        actor: &AdminIdentity,
        region_id: Uuid,
    ) -> Result<(), LifecycleError> {
        require_role(actor, ROLE_MODERATOR)?;
        self.store
            .apply_admin_decision(AdminDecision {
                region_id,
                expect: RegionStatus::PendingReview,
                to: RegionStatus::Approved,
                rejection_reason: None,
                set_approved_at: true,
                action: AdminActionRecord::new(
                    &actor.email,
                    AdminActionKind::Approve,
                    TargetKind::Region,
                    Some(region_id.to_string()),
                    None,
                ),
            })
            .await?;
        info!(%region_id, actor = %actor.email, "region approved");
        Ok(())
    }

    /// Reject a region held for review.
    ///
    /// Requires the `moderator` role. The region must be `pending_review`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Forbidden`] on a role mismatch, or the
    /// store's precondition error when the region is not `pending_review`.
    pub async fn reject(
        &self,
        actor: &AdminIdentity,
        region_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        require_role(actor, ROLE_MODERATOR)?;
        let reason = reason.into();
        self.store
            .apply_admin_decision(AdminDecision {
                region_id,
                expect: RegionStatus::PendingReview,
                to: RegionStatus::Rejected,
                rejection_reason: Some(reason.clone()),
                set_approved_at: false,
                action: AdminActionRecord::new(
                    &actor.email,
                    AdminActionKind::Reject,
                    TargetKind::Region,
                    Some(region_id.to_string()),
                    Some(reason),
                ),
            })
            .await?;
        info!(%region_id, actor = %actor.email, "region rejected");
        Ok(())
    }

    /// Take down a published region.
    ///
    /// Requires the `admin` role. The region must be `approved`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Forbidden`] on a role mismatch, or the
    /// store's precondition error when the region is not `approved`.
    pub async fn remove(
        &self,
        actor: &AdminIdentity,
        region_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        require_role(actor, ROLE_ADMIN)?;
        let reason = reason.into();
        self.store
            .apply_admin_decision(AdminDecision {
                region_id,
                expect: RegionStatus::Approved,
                to: RegionStatus::RemovedAfterPublish,
                rejection_reason: Some(reason.clone()),
                set_approved_at: false,
                action: AdminActionRecord::new(
                    &actor.email,
                    AdminActionKind::Remove,
                    TargetKind::Region,
                    Some(region_id.to_string()),
                    Some(reason),
                ),
            })
            .await?;
        info!(%region_id, actor = %actor.email, "region removed after publish");
        Ok(())
    }

    /// Regions currently awaiting review, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    pub async fn review_queue(&self) -> Result<Vec<Region>, LifecycleError> {
        Ok(self.store.pending_review_regions().await?)
    }
}

fn require_role(actor: &AdminIdentity, required: &'static str) -> Result<(), LifecycleError> {
    if actor.has_role(required) {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden {
            required,
            actual: actor.role.clone(),
        })
    }
}
