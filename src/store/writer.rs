//! Single-writer actor for serialized SQLite mutations.
//!
//! All database writes flow through this actor via an
//! [`mpsc`](tokio::sync::mpsc) channel. Serializing writes prevents SQLite
//! write contention and makes compound operations race-free: the
//! availability re-check plus insert of a reservation, the duplicate
//! pre-checks for bans and payment references, and the guarded lifecycle
//! transitions all execute without interleaving. Callers that need a result
//! attach a [`oneshot`](tokio::sync::oneshot) reply channel.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;
use uuid::Uuid;

use super::{
    AdminActionRecord, AdminDecision, BanEntry, PaymentRecord, PaymentStatus, PricingZone, Region,
    RegionStatus, StoreError, Submission, VerdictRecord,
};

/// Operations that can be sent to the write actor.
#[derive(Debug)]
pub enum WriteOp {
    /// Re-check availability and insert a `draft` region atomically.
    Reserve {
        /// The fully built region to insert.
        region: Region,
        /// Reply with the inserted region or the conflicting set.
        reply: oneshot::Sender<Result<Region, StoreError>>,
    },

    /// Insert a pricing zone.
    InsertZone {
        /// Zone to insert.
        zone: PricingZone,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Insert a submission, assign its version, and activate it.
    CreateSubmission {
        /// Submission to insert (version is assigned here).
        submission: Submission,
        /// Reply with the submission carrying its assigned version.
        reply: oneshot::Sender<Result<Submission, StoreError>>,
    },

    /// Persist a moderation verdict.
    RecordVerdict {
        /// Verdict to insert.
        verdict: VerdictRecord,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Insert a ban entry plus its audit record transactionally.
    InsertBan {
        /// Ban to insert.
        ban: BanEntry,
        /// Audit record committed with it.
        action: AdminActionRecord,
        /// Reply with the inserted ban.
        reply: oneshot::Sender<Result<BanEntry, StoreError>>,
    },

    /// Insert a payment record.
    InsertPayment {
        /// Payment to insert.
        payment: PaymentRecord,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Mark a pending payment as succeeded.
    SettlePayment {
        /// Provider reference.
        reference: String,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Mark a payment refunded and reject its approved region.
    RefundPayment {
        /// Provider reference.
        reference: String,
        /// Rejection reason recorded on the region.
        reason: String,
        /// Audit record committed in the same transaction.
        action: AdminActionRecord,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Apply an admin decision with its audit record transactionally.
    AdminDecision {
        /// The decision to apply.
        decision: AdminDecision,
        /// Completion reply.
        reply: oneshot::Sender<Result<(), StoreError>>,
    },

    /// Apply a moderation outcome guarded by the active submission id.
    ApplyModeration {
        /// Target region.
        region_id: Uuid,
        /// The submission the pipeline run was computed for.
        submission_id: Uuid,
        /// Status to transition to.
        to: RegionStatus,
        /// Rejection reason, when rejecting.
        rejection_reason: Option<String>,
        /// Reply with `true` when applied, `false` when stale.
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
}

/// Run the single-writer actor loop.
///
/// Processes [`WriteOp`] messages until the sender half is dropped. Reply
/// channels whose receiver has gone away are ignored.
pub async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Reserve { region, reply } => {
                let _ = reply.send(reserve(&db, region).await);
            }
            WriteOp::InsertZone { zone, reply } => {
                let _ = reply.send(insert_zone(&db, &zone).await);
            }
            WriteOp::CreateSubmission { submission, reply } => {
                let _ = reply.send(create_submission(&db, submission).await);
            }
            WriteOp::RecordVerdict { verdict, reply } => {
                let _ = reply.send(record_verdict(&db, &verdict).await);
            }
            WriteOp::InsertBan { ban, action, reply } => {
                let _ = reply.send(insert_ban(&db, ban, &action).await);
            }
            WriteOp::InsertPayment { payment, reply } => {
                let _ = reply.send(insert_payment(&db, &payment).await);
            }
            WriteOp::SettlePayment { reference, reply } => {
                let _ = reply.send(settle_payment(&db, &reference).await);
            }
            WriteOp::RefundPayment {
                reference,
                reason,
                action,
                reply,
            } => {
                let _ = reply.send(refund_payment(&db, &reference, &reason, action).await);
            }
            WriteOp::AdminDecision { decision, reply } => {
                let _ = reply.send(admin_decision(&db, decision).await);
            }
            WriteOp::ApplyModeration {
                region_id,
                submission_id,
                to,
                rejection_reason,
                reply,
            } => {
                let _ = reply.send(
                    apply_moderation(&db, region_id, submission_id, to, rejection_reason).await,
                );
            }
        }
    }
    trace!("store writer actor stopped");
}

// ── Op handlers ─────────────────────────────────────────────────

async fn reserve(db: &SqlitePool, region: Region) -> Result<Region, StoreError> {
    // Serialized with every other write, so check-then-insert cannot race
    // with a concurrent overlapping reservation.
    let conflicts = super::Store::blocking_overlap_query(db, &region.rect()).await?;
    if !conflicts.is_empty() {
        return Err(StoreError::RegionConflict(conflicts));
    }

    sqlx::query(
        "INSERT INTO regions (id, x_start, y_start, width, height, price_cents, \
         buyer_email, edit_credential, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(region.id.to_string())
    .bind(i64::from(region.x_start))
    .bind(i64::from(region.y_start))
    .bind(i64::from(region.width))
    .bind(i64::from(region.height))
    .bind(region.price_cents)
    .bind(&region.buyer_email)
    .bind(&region.edit_credential)
    .bind(region.status.as_str())
    .execute(db)
    .await?;
    trace!(region = %region.id, "region reserved");
    Ok(region)
}

async fn insert_zone(db: &SqlitePool, zone: &PricingZone) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO pricing_zones (id, name, x_start, y_start, width, height, \
         price_per_unit_cents, locked, premium) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(zone.id.to_string())
    .bind(&zone.name)
    .bind(i64::from(zone.x_start))
    .bind(i64::from(zone.y_start))
    .bind(i64::from(zone.width))
    .bind(i64::from(zone.height))
    .bind(zone.price_per_unit_cents)
    .bind(i64::from(zone.locked))
    .bind(i64::from(zone.premium))
    .execute(db)
    .await?;
    trace!(zone = %zone.name, "pricing zone inserted");
    Ok(())
}

async fn create_submission(
    db: &SqlitePool,
    mut submission: Submission,
) -> Result<Submission, StoreError> {
    let mut tx = db.begin().await?;

    // Resolve the region before touching submissions, otherwise the FK
    // constraint fires first and masks the not-found case.
    let region: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM regions WHERE id = ?1")
        .bind(submission.region_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if region.is_none() {
        return Err(StoreError::NotFound {
            entity: "region",
            id: submission.region_id.to_string(),
        });
    }

    let (max_version,): (i64,) =
        sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM submissions WHERE region_id = ?1")
            .bind(submission.region_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
    submission.version = max_version.saturating_add(1);

    sqlx::query(
        "INSERT INTO submissions (id, region_id, object_key, fingerprint, link_url, \
         hover_title, hover_description, hover_cta, version) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(submission.id.to_string())
    .bind(submission.region_id.to_string())
    .bind(&submission.object_key)
    .bind(&submission.fingerprint)
    .bind(&submission.link_url)
    .bind(&submission.hover.title)
    .bind(&submission.hover.description)
    .bind(&submission.hover.cta)
    .bind(submission.version)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        "UPDATE regions SET active_submission_id = ?1, updated_at = datetime('now') WHERE id = ?2",
    )
    .bind(submission.id.to_string())
    .bind(submission.region_id.to_string())
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound {
            entity: "region",
            id: submission.region_id.to_string(),
        });
    }

    tx.commit().await?;
    trace!(
        submission = %submission.id,
        region = %submission.region_id,
        version = submission.version,
        "submission created"
    );
    Ok(submission)
}

async fn record_verdict(db: &SqlitePool, verdict: &VerdictRecord) -> Result<(), StoreError> {
    let categories =
        serde_json::to_string(&verdict.categories).unwrap_or_else(|_| "[]".to_owned());
    sqlx::query(
        "INSERT INTO verdicts (id, submission_id, check_kind, flagged, confidence, \
         categories, raw_result) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(verdict.id.to_string())
    .bind(verdict.submission_id.to_string())
    .bind(verdict.kind.as_str())
    .bind(i64::from(verdict.flagged))
    .bind(verdict.confidence)
    .bind(categories)
    .bind(verdict.raw.to_string())
    .execute(db)
    .await?;
    trace!(
        submission = %verdict.submission_id,
        check = verdict.kind.as_str(),
        flagged = verdict.flagged,
        "verdict recorded"
    );
    Ok(())
}

async fn insert_ban(
    db: &SqlitePool,
    ban: BanEntry,
    action: &AdminActionRecord,
) -> Result<BanEntry, StoreError> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM bans WHERE kind = ?1 AND value = ?2")
            .bind(ban.kind.as_str())
            .bind(&ban.value)
            .fetch_optional(db)
            .await?;
    if existing.is_some() {
        return Err(StoreError::DuplicateBan {
            kind: ban.kind,
            value: ban.value,
        });
    }

    let mut tx = db.begin().await?;
    sqlx::query(
        "INSERT INTO bans (id, kind, value, reason, created_by) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(ban.id.to_string())
    .bind(ban.kind.as_str())
    .bind(&ban.value)
    .bind(&ban.reason)
    .bind(&ban.created_by)
    .execute(&mut *tx)
    .await?;
    insert_action(&mut tx, action).await?;
    tx.commit().await?;
    trace!(kind = ban.kind.as_str(), value = %ban.value, "ban inserted");
    Ok(ban)
}

async fn insert_payment(db: &SqlitePool, payment: &PaymentRecord) -> Result<(), StoreError> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM payments WHERE reference = ?1")
        .bind(&payment.reference)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Err(StoreError::DuplicateReference {
            reference: payment.reference.clone(),
        });
    }

    sqlx::query(
        "INSERT INTO payments (id, region_id, reference, amount_cents, status, paid_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(payment.id.to_string())
    .bind(payment.region_id.to_string())
    .bind(&payment.reference)
    .bind(payment.amount_cents)
    .bind(payment.status.as_str())
    .bind(&payment.paid_at)
    .execute(db)
    .await?;
    trace!(reference = %payment.reference, "payment inserted");
    Ok(())
}

async fn settle_payment(db: &SqlitePool, reference: &str) -> Result<(), StoreError> {
    let updated = sqlx::query(
        "UPDATE payments SET status = 'succeeded', paid_at = datetime('now') \
         WHERE reference = ?1 AND status = 'pending'",
    )
    .bind(reference)
    .execute(db)
    .await?;
    if updated.rows_affected() == 0 {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT status FROM payments WHERE reference = ?1")
                .bind(reference)
                .fetch_optional(db)
                .await?;
        return match existing {
            Some(_) => Err(StoreError::DuplicateReference {
                reference: reference.to_owned(),
            }),
            None => Err(StoreError::NotFound {
                entity: "payment",
                id: reference.to_owned(),
            }),
        };
    }
    trace!(reference, "payment settled");
    Ok(())
}

async fn refund_payment(
    db: &SqlitePool,
    reference: &str,
    reason: &str,
    action: AdminActionRecord,
) -> Result<(), StoreError> {
    let payment: Option<(String, String)> =
        sqlx::query_as("SELECT region_id, status FROM payments WHERE reference = ?1")
            .bind(reference)
            .fetch_optional(db)
            .await?;
    let Some((region_id, status)) = payment else {
        return Err(StoreError::NotFound {
            entity: "payment",
            id: reference.to_owned(),
        });
    };
    if PaymentStatus::parse(&status)? == PaymentStatus::Refunded {
        return Err(StoreError::DuplicateReference {
            reference: reference.to_owned(),
        });
    }

    let mut tx = db.begin().await?;
    sqlx::query(
        "UPDATE payments SET status = 'refunded', refunded_at = datetime('now') \
         WHERE reference = ?1",
    )
    .bind(reference)
    .execute(&mut *tx)
    .await?;
    // A refund forces a published region out of the public grid; regions in
    // other states keep their status.
    sqlx::query(
        "UPDATE regions SET status = 'rejected', rejection_reason = ?1, \
         updated_at = datetime('now') WHERE id = ?2 AND status = 'approved'",
    )
    .bind(reason)
    .bind(&region_id)
    .execute(&mut *tx)
    .await?;
    let mut action = action;
    action.target_id = Some(region_id.clone());
    insert_action(&mut tx, &action).await?;
    tx.commit().await?;
    trace!(reference, region = %region_id, "payment refunded");
    Ok(())
}

async fn admin_decision(db: &SqlitePool, decision: AdminDecision) -> Result<(), StoreError> {
    let mut tx = db.begin().await?;

    let current: Option<(String,)> = sqlx::query_as("SELECT status FROM regions WHERE id = ?1")
        .bind(decision.region_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    let Some((current,)) = current else {
        return Err(StoreError::NotFound {
            entity: "region",
            id: decision.region_id.to_string(),
        });
    };
    let actual = RegionStatus::parse(&current)?;
    if actual != decision.expect {
        return Err(StoreError::StatusPrecondition {
            region: decision.region_id,
            expected: decision.expect,
            actual,
        });
    }

    let sql = if decision.set_approved_at {
        "UPDATE regions SET status = ?1, rejection_reason = ?2, \
         approved_at = datetime('now'), updated_at = datetime('now') WHERE id = ?3"
    } else {
        "UPDATE regions SET status = ?1, rejection_reason = ?2, \
         updated_at = datetime('now') WHERE id = ?3"
    };
    sqlx::query(sql)
        .bind(decision.to.as_str())
        .bind(&decision.rejection_reason)
        .bind(decision.region_id.to_string())
        .execute(&mut *tx)
        .await?;

    insert_action(&mut tx, &decision.action).await?;
    tx.commit().await?;
    trace!(
        region = %decision.region_id,
        to = decision.to.as_str(),
        actor = %decision.action.actor,
        "admin decision applied"
    );
    Ok(())
}

async fn apply_moderation(
    db: &SqlitePool,
    region_id: Uuid,
    submission_id: Uuid,
    to: RegionStatus,
    rejection_reason: Option<String>,
) -> Result<bool, StoreError> {
    let sql = if to == RegionStatus::Approved {
        "UPDATE regions SET status = ?1, rejection_reason = ?2, \
         approved_at = datetime('now'), updated_at = datetime('now') \
         WHERE id = ?3 AND active_submission_id = ?4 \
           AND status IN ('draft', 'pending_review')"
    } else {
        "UPDATE regions SET status = ?1, rejection_reason = ?2, \
         updated_at = datetime('now') \
         WHERE id = ?3 AND active_submission_id = ?4 \
           AND status IN ('draft', 'pending_review')"
    };
    let updated = sqlx::query(sql)
        .bind(to.as_str())
        .bind(&rejection_reason)
        .bind(region_id.to_string())
        .bind(submission_id.to_string())
        .execute(db)
        .await?;
    let applied = updated.rows_affected() > 0;
    trace!(
        region = %region_id,
        submission = %submission_id,
        to = to.as_str(),
        applied,
        "moderation outcome"
    );
    Ok(applied)
}

async fn insert_action(
    tx: &mut Transaction<'_, Sqlite>,
    action: &AdminActionRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO admin_actions (id, actor, action_kind, target_kind, target_id, reason) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(action.id.to_string())
    .bind(&action.actor)
    .bind(action.kind.as_str())
    .bind(action.target_kind.as_str())
    .bind(&action.target_id)
    .bind(&action.reason)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
