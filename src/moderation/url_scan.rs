//! Destination URL checker.
//!
//! Purely local heuristics over the link URL: banned-domain registry hits
//! and suspicious substrings in the URL itself. Never touches the network,
//! so it cannot fail open.

use async_trait::async_trait;

use crate::bans::BanRegistry;
use crate::moderation::{
    CheckKind, CheckOutcome, CheckerError, SignalChecker, SubmissionContent,
};

/// Substrings that mark a link as suspicious without a registry entry.
const SUSPICIOUS_URL_TERMS: &[&str] = &[
    "casino", "porn", "xxx", "adult", "bitcoin", "crypto", "free-money",
];

/// Flags submissions whose destination link is banned or looks suspicious.
pub struct UrlScanChecker {
    bans: BanRegistry,
}

impl UrlScanChecker {
    /// Build a checker over the given ban registry.
    pub fn new(bans: BanRegistry) -> Self {
        Self { bans }
    }
}

#[async_trait]
impl SignalChecker for UrlScanChecker {
    fn kind(&self) -> CheckKind {
        CheckKind::UrlScan
    }

    async fn check(&self, content: &SubmissionContent) -> Result<CheckOutcome, CheckerError> {
        let url = content.link_url.to_lowercase();

        if let Some(domain) = self.bans.matches_banned_domain(&content.link_url).await? {
            return Ok(CheckOutcome {
                flagged: true,
                confidence: Some(1.0),
                categories: vec!["banned_domain".to_string()],
                raw: serde_json::json!({ "url": content.link_url, "banned_domain": domain }),
            });
        }

        let hits: Vec<String> = SUSPICIOUS_URL_TERMS
            .iter()
            .filter(|term| url.contains(*term))
            .map(|term| (*term).to_string())
            .collect();
        let flagged = !hits.is_empty();

        Ok(CheckOutcome {
            flagged,
            confidence: flagged.then_some(0.7),
            categories: hits,
            raw: serde_json::json!({ "url": content.link_url }),
        })
    }
}
