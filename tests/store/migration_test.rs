//! Tests for `migrations/001_schema.sql` applying cleanly and enforcing its
//! uniqueness constraints.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

async fn fresh_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true)
        .foreign_keys(true);
    // In-memory databases are per-connection, so limit to 1 connection
    // to ensure migrations and queries share the same database.
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("in-memory pool should connect")
}

async fn apply_migrations(pool: &SqlitePool) {
    let schema = include_str!("../../migrations/001_schema.sql");
    sqlx::raw_sql(schema)
        .execute(pool)
        .await
        .expect("001 should apply");
}

async fn insert_region(pool: &SqlitePool, id: &str, credential: &str) {
    sqlx::query(
        "INSERT INTO regions (id, x_start, y_start, width, height, price_cents, \
         buyer_email, edit_credential) VALUES (?1, 0, 0, 10, 10, 1000, \
         'buyer@example.com', ?2)",
    )
    .bind(id)
    .bind(credential)
    .execute(pool)
    .await
    .expect("region insert should succeed");
}

#[tokio::test]
async fn migration_applies_on_fresh_database() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
}

#[tokio::test]
async fn migration_is_reapplicable() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
    apply_migrations(&pool).await;
}

#[tokio::test]
async fn regions_default_to_draft() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
    insert_region(&pool, "r1", "cred-1").await;

    let (status,): (String,) = sqlx::query_as("SELECT status FROM regions WHERE id = 'r1'")
        .fetch_one(&pool)
        .await
        .expect("select should succeed");
    assert_eq!(status, "draft");
}

#[tokio::test]
async fn edit_credential_is_unique() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
    insert_region(&pool, "r1", "cred-1").await;

    let duplicate = sqlx::query(
        "INSERT INTO regions (id, x_start, y_start, width, height, price_cents, \
         buyer_email, edit_credential) VALUES ('r2', 50, 50, 10, 10, 1000, \
         'other@example.com', 'cred-1')",
    )
    .execute(&pool)
    .await;
    assert!(duplicate.is_err(), "duplicate credential must be rejected");
}

#[tokio::test]
async fn unknown_region_status_is_rejected() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;

    let bad = sqlx::query(
        "INSERT INTO regions (id, x_start, y_start, width, height, price_cents, \
         buyer_email, edit_credential, status) VALUES ('r1', 0, 0, 10, 10, 1000, \
         'buyer@example.com', 'cred-1', 'limbo')",
    )
    .execute(&pool)
    .await;
    assert!(bad.is_err(), "status CHECK must reject unknown values");
}

#[tokio::test]
async fn ban_pairs_are_unique() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;

    sqlx::query("INSERT INTO bans (id, kind, value) VALUES ('b1', 'domain', 'spam.example')")
        .execute(&pool)
        .await
        .expect("first ban should insert");
    let duplicate =
        sqlx::query("INSERT INTO bans (id, kind, value) VALUES ('b2', 'domain', 'spam.example')")
            .execute(&pool)
            .await;
    assert!(duplicate.is_err(), "duplicate (kind, value) must be rejected");

    // Same value under a different kind is a different ban.
    sqlx::query("INSERT INTO bans (id, kind, value) VALUES ('b3', 'keyword', 'spam.example')")
        .execute(&pool)
        .await
        .expect("same value under another kind should insert");
}

#[tokio::test]
async fn payment_references_are_unique() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
    insert_region(&pool, "r1", "cred-1").await;

    sqlx::query(
        "INSERT INTO payments (id, region_id, reference, amount_cents) \
         VALUES ('p1', 'r1', 'ref-1', 40000)",
    )
    .execute(&pool)
    .await
    .expect("first payment should insert");
    let (status,): (String,) = sqlx::query_as("SELECT status FROM payments WHERE id = 'p1'")
        .fetch_one(&pool)
        .await
        .expect("payment should be readable");
    assert_eq!(status, "pending", "new payments default to pending");
    let duplicate = sqlx::query(
        "INSERT INTO payments (id, region_id, reference, amount_cents) \
         VALUES ('p2', 'r1', 'ref-1', 40000)",
    )
    .execute(&pool)
    .await;
    assert!(duplicate.is_err(), "duplicate reference must be rejected");
}

#[tokio::test]
async fn deleting_a_region_cascades_to_submissions() {
    let pool = fresh_pool().await;
    apply_migrations(&pool).await;
    insert_region(&pool, "r1", "cred-1").await;

    sqlx::query(
        "INSERT INTO submissions (id, region_id, object_key, fingerprint, link_url) \
         VALUES ('s1', 'r1', 'submissions/a.png', 'abc', 'https://example.com')",
    )
    .execute(&pool)
    .await
    .expect("submission insert should succeed");

    sqlx::query("DELETE FROM regions WHERE id = 'r1'")
        .execute(&pool)
        .await
        .expect("region delete should succeed");

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM submissions")
        .fetch_one(&pool)
        .await
        .expect("count should succeed");
    assert_eq!(count, 0);
}
