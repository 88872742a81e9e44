//! Role gating and status preconditions on administrative transitions.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use gridlot::lifecycle::{AdminIdentity, LifecycleError, RegionAdmin, ROLE_ADMIN, ROLE_MODERATOR};
use gridlot::store::{Region, RegionStatus, Store, StoreError};

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

static NEXT_X: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

async fn region_in(store: &Store, status: RegionStatus) -> Uuid {
    // Distinct rectangles per call; draft regions hold their rectangle.
    let x = NEXT_X.fetch_add(30, std::sync::atomic::Ordering::SeqCst);
    let region = store
        .reserve_region(Region {
            id: Uuid::new_v4(),
            x_start: x,
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

async fn status_of(store: &Store, id: Uuid) -> RegionStatus {
    store
        .region(id)
        .await
        .expect("read should succeed")
        .expect("region should exist")
        .status
}

fn moderator() -> AdminIdentity {
    AdminIdentity::new("mod@example.com", ROLE_MODERATOR)
}

fn admin() -> AdminIdentity {
    AdminIdentity::new("root@example.com", ROLE_ADMIN)
}

#[tokio::test]
async fn moderator_approves_pending_region() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::PendingReview).await;

    RegionAdmin::new(Arc::clone(&store))
        .approve(&moderator(), id)
        .await
        .expect("approval should succeed");

    assert_eq!(status_of(&store, id).await, RegionStatus::Approved);
}

#[tokio::test]
async fn approving_a_draft_is_a_precondition_error() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::Draft).await;

    let result = RegionAdmin::new(Arc::clone(&store))
        .approve(&moderator(), id)
        .await;
    assert!(matches!(
        result,
        Err(LifecycleError::Store(StoreError::StatusPrecondition { .. }))
    ));
    assert_eq!(status_of(&store, id).await, RegionStatus::Draft);
}

#[tokio::test]
async fn rejecting_records_the_reason() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::PendingReview).await;

    RegionAdmin::new(Arc::clone(&store))
        .reject(&moderator(), id, "misleading claims")
        .await
        .expect("rejection should succeed");

    let region = store
        .region(id)
        .await
        .expect("read should succeed")
        .expect("region should exist");
    assert_eq!(region.status, RegionStatus::Rejected);
    assert_eq!(region.rejection_reason.as_deref(), Some("misleading claims"));
}

#[tokio::test]
async fn removal_requires_the_admin_role() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::Approved).await;
    let admin_surface = RegionAdmin::new(Arc::clone(&store));

    let result = admin_surface
        .remove(&moderator(), id, "dmca takedown")
        .await;
    assert!(matches!(result, Err(LifecycleError::Forbidden { .. })));
    assert_eq!(status_of(&store, id).await, RegionStatus::Approved);

    admin_surface
        .remove(&admin(), id, "dmca takedown")
        .await
        .expect("admin removal should succeed");
    assert_eq!(status_of(&store, id).await, RegionStatus::RemovedAfterPublish);
}

#[tokio::test]
async fn admin_role_can_work_the_review_queue() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::PendingReview).await;

    RegionAdmin::new(Arc::clone(&store))
        .approve(&admin(), id)
        .await
        .expect("admin role should satisfy the moderator requirement");
    assert_eq!(status_of(&store, id).await, RegionStatus::Approved);
}

#[tokio::test]
async fn unknown_roles_are_forbidden() {
    let store = mem_store().await;
    let id = region_in(&store, RegionStatus::PendingReview).await;

    let viewer = AdminIdentity::new("viewer@example.com", "viewer");
    let result = RegionAdmin::new(Arc::clone(&store)).approve(&viewer, id).await;
    assert!(matches!(result, Err(LifecycleError::Forbidden { .. })));
    assert_eq!(status_of(&store, id).await, RegionStatus::PendingReview);
}

#[tokio::test]
async fn review_queue_lists_pending_regions_oldest_first() {
    let store = mem_store().await;
    let first = region_in(&store, RegionStatus::PendingReview).await;
    let _draft = region_in(&store, RegionStatus::Draft).await;
    let second = region_in(&store, RegionStatus::PendingReview).await;

    let queue = RegionAdmin::new(Arc::clone(&store))
        .review_queue()
        .await
        .expect("queue read should succeed");
    assert_eq!(
        queue.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![first, second],
    );
}
