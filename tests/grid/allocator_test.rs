//! Reservation, availability, and the concurrency guarantee.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use gridlot::config::CanvasConfig;
use gridlot::grid::{GridAllocator, GridError, Rect};
use gridlot::store::{RegionStatus, Store};

async fn mem_store() -> Arc<Store> {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true)
        .foreign_keys(true);
    // In-memory databases are per-connection; one connection keeps the
    // writer actor and readers on the same database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("in-memory pool should connect");
    Store::migrate(&pool).await.expect("schema should apply");
    Arc::new(Store::from_pool(pool))
}

fn allocator(store: &Arc<Store>) -> GridAllocator {
    GridAllocator::new(CanvasConfig::default(), Arc::clone(store))
}

#[tokio::test]
async fn reservation_creates_draft_region_with_credential() {
    let store = mem_store().await;
    let grid = allocator(&store);

    let region = grid
        .reserve(&Rect::new(0, 0, 20, 20), "buyer@example.com")
        .await
        .expect("empty canvas should accept the reservation");

    assert_eq!(region.status, RegionStatus::Draft);
    assert_eq!(region.price_cents, 40_000);
    assert!(!region.edit_credential.is_empty());

    let stored = store
        .region(region.id)
        .await
        .expect("read should succeed")
        .expect("region should be persisted");
    assert_eq!(stored.edit_credential, region.edit_credential);
    assert_eq!(stored.status, RegionStatus::Draft);
}

#[tokio::test]
async fn overlapping_reservation_conflicts_with_draft() {
    let store = mem_store().await;
    let grid = allocator(&store);

    let first = grid
        .reserve(&Rect::new(0, 0, 20, 20), "first@example.com")
        .await
        .expect("first reservation should succeed");

    // 10x10 overlap area with the first rectangle.
    let err = grid
        .reserve(&Rect::new(10, 10, 20, 20), "second@example.com")
        .await
        .expect_err("overlapping reservation should fail");
    match err {
        GridError::Unavailable { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].id, first.id);
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn touching_edges_do_not_conflict() {
    let store = mem_store().await;
    let grid = allocator(&store);

    grid.reserve(&Rect::new(0, 0, 20, 20), "a@example.com")
        .await
        .expect("first reservation should succeed");
    // Shares the x=20 edge only; half-open intervals make this legal.
    grid.reserve(&Rect::new(20, 0, 20, 20), "b@example.com")
        .await
        .expect("edge-adjacent reservation should succeed");
}

#[tokio::test]
async fn released_rectangles_can_be_re_reserved() {
    let store = mem_store().await;
    let grid = allocator(&store);

    let rect = Rect::new(100, 100, 30, 30);
    let region = grid
        .reserve(&rect, "a@example.com")
        .await
        .expect("reservation should succeed");

    // Force the region into a released state directly.
    sqlx::query("UPDATE regions SET status = 'rejected' WHERE id = ?1")
        .bind(region.id.to_string())
        .execute(store.pool())
        .await
        .expect("status update should succeed");

    grid.reserve(&rect, "b@example.com")
        .await
        .expect("released rectangle should be re-reservable");
}

#[tokio::test]
async fn validation_errors_persist_nothing() {
    let store = mem_store().await;
    let grid = allocator(&store);

    // Out of bounds.
    assert!(matches!(
        grid.reserve(&Rect::new(990, 0, 20, 20), "a@example.com").await,
        Err(GridError::OutOfBounds { .. })
    ));
    // Not a multiple of the 10-unit minimum.
    assert!(matches!(
        grid.reserve(&Rect::new(0, 0, 15, 20), "a@example.com").await,
        Err(GridError::BadDimensions { .. })
    ));
    // Zero-sized.
    assert!(matches!(
        grid.reserve(&Rect::new(0, 0, 0, 20), "a@example.com").await,
        Err(GridError::BadDimensions { .. })
    ));

    let counts = store.region_counts().await.expect("counts should succeed");
    assert!(counts.is_empty(), "no region should have been persisted");
}

#[tokio::test]
async fn availability_is_idempotent_without_writes() {
    let store = mem_store().await;
    let grid = allocator(&store);

    grid.reserve(&Rect::new(0, 0, 20, 20), "a@example.com")
        .await
        .expect("reservation should succeed");

    let rect = Rect::new(10, 10, 20, 20);
    let first = grid
        .check_availability(&rect)
        .await
        .expect("availability should succeed");
    let second = grid
        .check_availability(&rect)
        .await
        .expect("availability should succeed");

    assert_eq!(first.available, second.available);
    assert_eq!(
        first.conflicts.iter().map(|r| r.id).collect::<Vec<_>>(),
        second.conflicts.iter().map(|r| r.id).collect::<Vec<_>>(),
    );
}

#[tokio::test]
async fn concurrent_overlapping_reservations_yield_one_winner() {
    let store = mem_store().await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let grid = allocator(&store);
        tasks.spawn(async move {
            grid.reserve(&Rect::new(0, 0, 20, 20), &format!("buyer{i}@example.com"))
                .await
        });
    }

    let mut successes = 0;
    let mut conflicts = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task should not panic") {
            Ok(_) => successes += 1,
            Err(GridError::Unavailable { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one reservation must win");
    assert_eq!(conflicts, 7);
}
