//! Zone pricing and quote rules.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use gridlot::config::CanvasConfig;
use gridlot::grid::{GridAllocator, GridError, Rect};
use gridlot::store::{PricingZone, Store};

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

fn zone(name: &str, x: u32, y: u32, w: u32, h: u32, price: i64) -> PricingZone {
    PricingZone {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        x_start: x,
        y_start: y,
        width: w,
        height: h,
        price_per_unit_cents: price,
        locked: false,
        premium: false,
    }
}

#[tokio::test]
async fn default_price_applies_without_zones() {
    let store = mem_store().await;
    let grid = GridAllocator::new(CanvasConfig::default(), Arc::clone(&store));

    // 20x20 at the default 100 cents per unit: 400 units -> 40000 cents.
    let quote = grid
        .quote_price(&Rect::new(0, 0, 20, 20))
        .await
        .expect("quote should succeed");
    assert_eq!(quote.price_per_unit_cents, 100);
    assert_eq!(quote.total_cents, 40_000);
}

#[tokio::test]
async fn first_containing_zone_wins() {
    let store = mem_store().await;
    store
        .insert_zone(zone("premium-center", 0, 0, 500, 500, 300))
        .await
        .expect("zone insert should succeed");
    // Also contains the rectangle, but was created later.
    store
        .insert_zone(zone("broad", 0, 0, 1000, 1000, 500))
        .await
        .expect("zone insert should succeed");

    let grid = GridAllocator::new(CanvasConfig::default(), Arc::clone(&store));
    let quote = grid
        .quote_price(&Rect::new(100, 100, 20, 20))
        .await
        .expect("quote should succeed");
    assert_eq!(quote.price_per_unit_cents, 300);
    assert_eq!(quote.total_cents, 400 * 300);
}

#[tokio::test]
async fn partially_contained_rectangle_falls_through() {
    let store = mem_store().await;
    store
        .insert_zone(zone("corner", 0, 0, 100, 100, 300))
        .await
        .expect("zone insert should succeed");

    let grid = GridAllocator::new(CanvasConfig::default(), Arc::clone(&store));
    // Straddles the zone edge: containment requires the whole rectangle.
    let quote = grid
        .quote_price(&Rect::new(90, 90, 20, 20))
        .await
        .expect("quote should succeed");
    assert_eq!(quote.price_per_unit_cents, 100);
}

#[tokio::test]
async fn non_positive_zone_price_is_rejected() {
    let store = mem_store().await;
    store
        .insert_zone(zone("bogus", 0, 0, 1000, 1000, 0))
        .await
        .expect("zone insert should succeed");

    let grid = GridAllocator::new(CanvasConfig::default(), Arc::clone(&store));
    assert!(matches!(
        grid.quote_price(&Rect::new(0, 0, 20, 20)).await,
        Err(GridError::InvalidPrice { .. })
    ));
}

#[tokio::test]
async fn reservation_records_the_quoted_price() {
    let store = mem_store().await;
    store
        .insert_zone(zone("strip", 0, 0, 1000, 50, 250))
        .await
        .expect("zone insert should succeed");

    let grid = GridAllocator::new(CanvasConfig::default(), Arc::clone(&store));
    let region = grid
        .reserve(&Rect::new(0, 0, 40, 20), "buyer@example.com")
        .await
        .expect("reservation should succeed");
    assert_eq!(region.price_cents, 800 * 250);
}
