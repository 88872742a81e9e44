//! Settlement, duplicate references, and the refund takedown path.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use gridlot::lifecycle::{AdminIdentity, LifecycleError, ROLE_ADMIN, ROLE_MODERATOR};
use gridlot::payments::PaymentLedger;
use gridlot::store::{
    AdminActionKind, PaymentStatus, Region, RegionStatus, Store, StoreError,
};

async fn mem_store() -> Arc<Store> {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("in-memory pool should connect");
    Store::migrate(&pool).await.expect("schema should apply");
    Arc::new(Store::from_pool(pool))
}

async fn region_in(store: &Store, status: RegionStatus) -> Uuid {
    let region = store
        .reserve_region(Region {
            id: Uuid::new_v4(),
            x_start: 0,
            y_start: 0,
            width: 20,
            height: 20,
            price_cents: 40_000,
            buyer_email: "buyer@example.com".to_owned(),
            edit_credential: Uuid::new_v4().to_string(),
            status: RegionStatus::Draft,
            rejection_reason: None,
            active_submission_id: None,
            purchased_at: None,
            approved_at: None,
            expires_at: None,
            updated_at: None,
        })
        .await
        .expect("reservation should succeed");
    sqlx::query("UPDATE regions SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(region.id.to_string())
        .execute(store.pool())
        .await
        .expect("status update should succeed");
    region.id
}

#[tokio::test]
async fn settlement_marks_the_payment_succeeded() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Draft).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    ledger.settle("ref-1").await.expect("settlement should succeed");

    let payment = ledger
        .by_reference("ref-1")
        .await
        .expect("read should succeed")
        .expect("payment should exist");
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert!(payment.paid_at.is_some());

    let latest = store
        .latest_payment(region_id)
        .await
        .expect("read should succeed")
        .expect("region should have a payment");
    assert_eq!(latest.id, payment.id);
}

#[tokio::test]
async fn duplicate_references_are_integrity_errors() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Draft).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    let duplicate = ledger.record_pending(region_id, "ref-1", 40_000).await;
    assert!(matches!(
        duplicate,
        Err(StoreError::DuplicateReference { .. })
    ));
}

#[tokio::test]
async fn double_settlement_is_an_integrity_error() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Draft).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    ledger.settle("ref-1").await.expect("settlement should succeed");

    assert!(matches!(
        ledger.settle("ref-1").await,
        Err(StoreError::DuplicateReference { .. })
    ));
}

#[tokio::test]
async fn settling_an_unknown_reference_is_not_found() {
    let store = mem_store().await;
    let ledger = PaymentLedger::new(Arc::clone(&store));
    assert!(matches!(
        ledger.settle("no-such-ref").await,
        Err(StoreError::NotFound { entity: "payment", .. })
    ));
}

#[tokio::test]
async fn refund_takes_the_published_region_down() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Approved).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));
    let admin = AdminIdentity::new("root@example.com", ROLE_ADMIN);

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    ledger.settle("ref-1").await.expect("settlement should succeed");
    ledger
        .refund(&admin, "ref-1", "chargeback")
        .await
        .expect("refund should succeed");

    let payment = ledger
        .by_reference("ref-1")
        .await
        .expect("read should succeed")
        .expect("payment should exist");
    assert_eq!(payment.status, PaymentStatus::Refunded);

    let region = store
        .region(region_id)
        .await
        .expect("read should succeed")
        .expect("region should exist");
    assert_eq!(region.status, RegionStatus::Rejected);
    assert_eq!(region.rejection_reason.as_deref(), Some("chargeback"));

    // The takedown is audited.
    let actions = store
        .admin_actions(10, 0)
        .await
        .expect("audit read should succeed");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, AdminActionKind::Refund);
    assert_eq!(actions[0].target_id.as_deref(), Some(&region_id.to_string()[..]));
}

#[tokio::test]
async fn refund_leaves_undecided_regions_alone() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::PendingReview).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));
    let admin = AdminIdentity::new("root@example.com", ROLE_ADMIN);

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    ledger
        .refund(&admin, "ref-1", "buyer cancelled")
        .await
        .expect("refund should succeed");

    // Only approved regions are forced off the canvas.
    let region = store
        .region(region_id)
        .await
        .expect("read should succeed")
        .expect("region should exist");
    assert_eq!(region.status, RegionStatus::PendingReview);
}

#[tokio::test]
async fn refund_requires_the_admin_role() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Approved).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));
    let moderator = AdminIdentity::new("mod@example.com", ROLE_MODERATOR);

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    assert!(matches!(
        ledger.refund(&moderator, "ref-1", "nope").await,
        Err(LifecycleError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn double_refund_is_an_integrity_error() {
    let store = mem_store().await;
    let region_id = region_in(&store, RegionStatus::Approved).await;
    let ledger = PaymentLedger::new(Arc::clone(&store));
    let admin = AdminIdentity::new("root@example.com", ROLE_ADMIN);

    ledger
        .record_pending(region_id, "ref-1", 40_000)
        .await
        .expect("payment should record");
    ledger
        .refund(&admin, "ref-1", "chargeback")
        .await
        .expect("refund should succeed");
    assert!(matches!(
        ledger.refund(&admin, "ref-1", "again").await,
        Err(LifecycleError::Store(StoreError::DuplicateReference { .. }))
    ));
}
