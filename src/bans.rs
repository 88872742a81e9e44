//! Ban registry: append-only banned fingerprints (content hashes, domain
//! substrings, keywords) consulted by the moderation pipeline and listed by
//! administrators. No deletion; bans are permanent.

use std::sync::Arc;

use regex::Regex;
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::store::{
    AdminActionKind, AdminActionRecord, BanEntry, BanKind, Store, StoreError, TargetKind,
};

/// Read-mostly registry over the `bans` table.
#[derive(Debug, Clone)]
pub struct BanRegistry {
    store: Arc<Store>,
}

impl BanRegistry {
    /// Build a registry over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Insert a ban, writing its audit record in the same transaction.
    ///
    /// Idempotence contract: an identical `(kind, value)` pair is rejected,
    /// not silently accepted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateBan`] when the pair already exists.
    pub async fn ban(
        &self,
        kind: BanKind,
        value: &str,
        reason: Option<String>,
        actor: &str,
    ) -> Result<BanEntry, StoreError> {
        let ban = BanEntry {
            id: Uuid::new_v4(),
            kind,
            value: value.to_owned(),
            reason: reason.clone(),
            created_by: Some(actor.to_owned()),
            created_at: None,
        };
        let (action_kind, target_kind) = match kind {
            BanKind::Domain => (AdminActionKind::BanDomain, TargetKind::Domain),
            BanKind::ContentHash => (AdminActionKind::BanContentHash, TargetKind::ContentHash),
            BanKind::Keyword => (AdminActionKind::BanKeyword, TargetKind::Keyword),
        };
        let action = AdminActionRecord::new(
            actor,
            action_kind,
            target_kind,
            Some(value.to_owned()),
            reason,
        );
        let entry = self.store.insert_ban(ban, action).await?;
        info!(kind = kind.as_str(), value, actor, "ban recorded");
        Ok(entry)
    }

    /// Whether a content fingerprint is banned (exact match).
    pub async fn is_hash_banned(&self, fingerprint: &str) -> Result<bool, StoreError> {
        self.store
            .ban_exists(BanKind::ContentHash, fingerprint)
            .await
    }

    /// The banned domain matching the host of `link_url`, if any.
    ///
    /// A ban matches when its value is a case-insensitive substring of the
    /// link's host.
    pub async fn matches_banned_domain(
        &self,
        link_url: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(host) = extract_host(link_url) else {
            return Ok(None);
        };
        let bans = self.store.bans_of_kind(BanKind::Domain).await?;
        Ok(bans
            .iter()
            .find(|ban| host.contains(&ban.value.to_lowercase()))
            .map(|ban| ban.value.clone()))
    }

    /// All banned keywords, lowercased, for text matching.
    pub async fn banned_keywords(&self) -> Result<Vec<String>, StoreError> {
        let bans = self.store.bans_of_kind(BanKind::Keyword).await?;
        Ok(bans.iter().map(|ban| ban.value.to_lowercase()).collect())
    }

    /// All bans, newest first.
    pub async fn list(&self) -> Result<Vec<BanEntry>, StoreError> {
        self.store.list_bans().await
    }
}

/// Extract the lowercased host from a URL, tolerating slightly malformed
/// input the way ad links arrive in practice.
fn extract_host(link_url: &str) -> Option<String> {
    if let Ok(url) = Url::parse(link_url) {
        if let Some(host) = url.host_str() {
            return Some(host.to_lowercase());
        }
    }
    // Fallback for scheme-relative or otherwise unparseable links.
    let re = Regex::new(r"(?i)https?://([^/\s]+)").ok()?;
    re.captures(link_url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
}
