//! Ban registry semantics: uniqueness, lookups, and the audit trail.

use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use gridlot::bans::BanRegistry;
use gridlot::store::{AdminActionKind, BanKind, Store, StoreError};

async fn registry() -> (Arc<Store>, BanRegistry) {
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
    let store = Arc::new(Store::from_pool(pool));
    let registry = BanRegistry::new(Arc::clone(&store));
    (store, registry)
}

#[tokio::test]
async fn duplicate_pairs_are_rejected() {
    let (_store, bans) = registry().await;

    bans.ban(BanKind::Domain, "spam.example", None, "admin@example.com")
        .await
        .expect("first ban should insert");
    let duplicate = bans
        .ban(BanKind::Domain, "spam.example", None, "admin@example.com")
        .await;
    assert!(matches!(duplicate, Err(StoreError::DuplicateBan { .. })));

    // Same value under another kind is a distinct ban.
    bans.ban(BanKind::Keyword, "spam.example", None, "admin@example.com")
        .await
        .expect("different kind should insert");
}

#[tokio::test]
async fn hash_lookup_is_exact() {
    let (_store, bans) = registry().await;
    bans.ban(BanKind::ContentHash, "abc123", None, "admin@example.com")
        .await
        .expect("ban should insert");

    assert!(bans.is_hash_banned("abc123").await.expect("lookup should succeed"));
    assert!(!bans.is_hash_banned("abc12").await.expect("lookup should succeed"));
    assert!(!bans.is_hash_banned("ABC123").await.expect("lookup should succeed"));
}

#[tokio::test]
async fn domain_match_is_substring_and_case_insensitive() {
    let (_store, bans) = registry().await;
    bans.ban(BanKind::Domain, "Spam.Example", None, "admin@example.com")
        .await
        .expect("ban should insert");

    let hit = bans
        .matches_banned_domain("https://ads.SPAM.example/landing?x=1")
        .await
        .expect("lookup should succeed");
    assert_eq!(hit.as_deref(), Some("Spam.Example"));

    let miss = bans
        .matches_banned_domain("https://example.com/spam.example")
        .await
        .expect("lookup should succeed");
    assert_eq!(miss, None, "the path must not be matched, only the host");
}

#[tokio::test]
async fn unparseable_links_never_match() {
    let (_store, bans) = registry().await;
    bans.ban(BanKind::Domain, "spam.example", None, "admin@example.com")
        .await
        .expect("ban should insert");

    let miss = bans
        .matches_banned_domain("not a url at all")
        .await
        .expect("lookup should succeed");
    assert_eq!(miss, None);
}

#[tokio::test]
async fn every_ban_is_audited() {
    let (store, bans) = registry().await;
    bans.ban(
        BanKind::ContentHash,
        "abc123",
        Some("repeat offender".to_owned()),
        "admin@example.com",
    )
    .await
    .expect("ban should insert");

    let actions = store
        .admin_actions(10, 0)
        .await
        .expect("audit read should succeed");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, AdminActionKind::BanContentHash);
    assert_eq!(actions[0].target_id.as_deref(), Some("abc123"));
    assert_eq!(actions[0].reason.as_deref(), Some("repeat offender"));
}

#[tokio::test]
async fn listing_returns_newest_first() {
    let (_store, bans) = registry().await;
    bans.ban(BanKind::Domain, "first.example", None, "admin@example.com")
        .await
        .expect("ban should insert");
    bans.ban(BanKind::Domain, "second.example", None, "admin@example.com")
        .await
        .expect("ban should insert");

    let listed = bans.list().await.expect("list should succeed");
    assert_eq!(
        listed.iter().map(|b| b.value.as_str()).collect::<Vec<_>>(),
        vec!["second.example", "first.example"],
    );
}
