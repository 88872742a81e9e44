//! Payment settlement.
//!
//! Payments are recorded against a region when checkout starts and settled
//! when the provider confirms. Refunds are administrative: they mark the
//! payment refunded and force a published region off the canvas, with an
//! audit record, all in one transaction. Every provider reference is unique;
//! a duplicate settlement attempt is an integrity error, never a silent
//! no-op.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::lifecycle::{AdminIdentity, LifecycleError, ROLE_ADMIN};
use crate::store::{
    AdminActionKind, AdminActionRecord, PaymentRecord, PaymentStatus, Store, StoreError,
    TargetKind,
};

/// Settlement operations over payment records.
pub struct PaymentLedger {
    store: Arc<Store>,
}

impl PaymentLedger {
    /// Build a ledger over the store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Record a pending payment for a region at checkout time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateReference`] when the provider
    /// reference was already recorded.
    pub async fn record_pending(
        &self,
        region_id: Uuid,
        reference: &str,
        amount_cents: i64,
    ) -> Result<PaymentRecord, StoreError> {
        let payment = PaymentRecord {
            id: Uuid::new_v4(),
            region_id,
            reference: reference.to_owned(),
            amount_cents,
            status: PaymentStatus::Pending,
            paid_at: None,
            refunded_at: None,
            created_at: None,
        };
        self.store.insert_payment(payment.clone()).await?;
        info!(%region_id, reference, amount_cents, "payment recorded");
        Ok(payment)
    }

    /// Settle a pending payment on provider confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateReference`] when the payment was
    /// already settled or refunded, [`StoreError::NotFound`] for an unknown
    /// reference.
    pub async fn settle(&self, reference: &str) -> Result<(), StoreError> {
        self.store.settle_payment(reference).await?;
        info!(reference, "payment settled");
        Ok(())
    }

    /// Refund a payment, forcing its published region off the canvas.
    ///
    /// Requires the `admin` role. The payment moves to `refunded` and its
    /// region, when `approved`, to `rejected` with the given reason; the
    /// audit record commits in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Forbidden`] on a role mismatch,
    /// [`StoreError::DuplicateReference`] for an already-refunded payment,
    /// [`StoreError::NotFound`] for an unknown reference.
    pub async fn refund(
        &self,
        actor: &AdminIdentity,
        reference: &str,
        reason: &str,
    ) -> Result<(), LifecycleError> {
        if !actor.has_role(ROLE_ADMIN) {
            return Err(LifecycleError::Forbidden {
                required: ROLE_ADMIN,
                actual: actor.role.clone(),
            });
        }
        let action = AdminActionRecord::new(
            &actor.email,
            AdminActionKind::Refund,
            TargetKind::Region,
            None,
            Some(reason.to_owned()),
        );
        self.store.refund_payment(reference, reason, action).await?;
        info!(reference, actor = %actor.email, "payment refunded");
        Ok(())
    }

    /// Look up a payment by its provider reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    pub async fn by_reference(&self, reference: &str) -> Result<Option<PaymentRecord>, StoreError> {
        self.store.payment_by_reference(reference).await
    }
}
