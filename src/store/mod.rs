//! SQLite persistence for canvas regions, submissions, verdicts, bans,
//! payments, and the admin audit trail.
//!
//! The [`Store`] is the sole gateway to the database. All reads go directly
//! through the connection pool (concurrent). All mutations go through a
//! single-writer actor backed by an [`mpsc`](tokio::sync::mpsc) channel, so
//! compound writes — notably the availability re-check plus insert of a
//! reservation — execute serialized and race-free.
//!
//! Enums are stored as text with `as_str`/`parse` codec pairs; money is
//! integer cents; timestamps are UTC text set by SQLite.

pub mod writer;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::grid::Rect;

use self::writer::WriteOp;

// ---------------------------------------------------------------------------
// Domain enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a reserved region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    /// Reserved, payment not yet settled or content not yet submitted.
    Draft,
    /// Content flagged by moderation; awaiting a human decision.
    PendingReview,
    /// Publicly visible.
    Approved,
    /// Terminally rejected (by admin decision or banned content).
    Rejected,
    /// Removed by admin after having been published. Terminal.
    RemovedAfterPublish,
}

impl RegionStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RemovedAfterPublish => "removed_after_publish",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_review" => Ok(Self::PendingReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "removed_after_publish" => Ok(Self::RemovedAfterPublish),
            other => Err(StoreError::InvalidEnum {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of banned fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanKind {
    /// Link domain substring ban.
    Domain,
    /// Exact content hash ban.
    ContentHash,
    /// Extracted-text keyword ban.
    Keyword,
}

impl BanKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::ContentHash => "content_hash",
            Self::Keyword => "keyword",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised ban kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "domain" => Ok(Self::Domain),
            "content_hash" => Ok(Self::ContentHash),
            "keyword" => Ok(Self::Keyword),
            other => Err(StoreError::InvalidEnum {
                field: "kind",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for BanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which content-safety check produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Content fingerprint lookup against `content_hash` bans.
    HashBan,
    /// Link domain lookup against `domain` bans.
    DomainBan,
    /// Image classification provider.
    ImagePolicy,
    /// Object/label detection provider.
    LabelDetect,
    /// Text extraction plus keyword matching.
    OcrText,
    /// Local URL heuristic scan.
    UrlScan,
}

impl CheckKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashBan => "hash_ban",
            Self::DomainBan => "domain_ban",
            Self::ImagePolicy => "image_policy",
            Self::LabelDetect => "label_detect",
            Self::OcrText => "ocr_text",
            Self::UrlScan => "url_scan",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised check kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "hash_ban" => Ok(Self::HashBan),
            "domain_ban" => Ok(Self::DomainBan),
            "image_policy" => Ok(Self::ImagePolicy),
            "label_detect" => Ok(Self::LabelDetect),
            "ocr_text" => Ok(Self::OcrText),
            "url_scan" => Ok(Self::UrlScan),
            other => Err(StoreError::InvalidEnum {
                field: "check_kind",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout created, not yet settled.
    Pending,
    /// Settled successfully.
    Succeeded,
    /// Settlement failed.
    Failed,
    /// Refunded after settlement.
    Refunded,
}

impl PaymentStatus {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised payment status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(StoreError::InvalidEnum {
                field: "payment_status",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of state-changing administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionKind {
    /// Region approved for publication.
    Approve,
    /// Region rejected.
    Reject,
    /// Published region removed.
    Remove,
    /// Payment refunded.
    Refund,
    /// Domain added to the ban registry.
    BanDomain,
    /// Content hash added to the ban registry.
    BanContentHash,
    /// Keyword added to the ban registry.
    BanKeyword,
}

impl AdminActionKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Remove => "remove",
            Self::Refund => "refund",
            Self::BanDomain => "ban_domain",
            Self::BanContentHash => "ban_content_hash",
            Self::BanKeyword => "ban_keyword",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised action kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "remove" => Ok(Self::Remove),
            "refund" => Ok(Self::Refund),
            "ban_domain" => Ok(Self::BanDomain),
            "ban_content_hash" => Ok(Self::BanContentHash),
            "ban_keyword" => Ok(Self::BanKeyword),
            other => Err(StoreError::InvalidEnum {
                field: "action_kind",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for AdminActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an administrative action targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A canvas region.
    Region,
    /// A link domain.
    Domain,
    /// A content hash.
    ContentHash,
    /// A text keyword.
    Keyword,
}

impl TargetKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Domain => "domain",
            Self::ContentHash => "content_hash",
            Self::Keyword => "keyword",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised target kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "region" => Ok(Self::Region),
            "domain" => Ok(Self::Domain),
            "content_hash" => Ok(Self::ContentHash),
            "keyword" => Ok(Self::Keyword),
            other => Err(StoreError::InvalidEnum {
                field: "target_kind",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

/// A reserved rectangle of the canvas with its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier.
    pub id: Uuid,
    /// Left edge in grid units.
    pub x_start: u32,
    /// Top edge in grid units.
    pub y_start: u32,
    /// Width in grid units.
    pub width: u32,
    /// Height in grid units.
    pub height: u32,
    /// Quoted price in cents at reservation time.
    pub price_cents: i64,
    /// Buyer contact identity.
    pub buyer_email: String,
    /// One-time unguessable credential authorising content submission.
    pub edit_credential: String,
    /// Current lifecycle status.
    pub status: RegionStatus,
    /// Reason recorded on rejection or removal.
    pub rejection_reason: Option<String>,
    /// The submission currently driving moderation decisions, if any.
    pub active_submission_id: Option<Uuid>,
    /// Reservation timestamp (set by SQLite on insert).
    pub purchased_at: Option<String>,
    /// Approval timestamp.
    pub approved_at: Option<String>,
    /// Expiry timestamp; no sweep acts on it yet.
    pub expires_at: Option<String>,
    /// Last-update timestamp.
    pub updated_at: Option<String>,
}

impl Region {
    /// The rectangle this region occupies.
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x_start,
            y: self.y_start,
            width: self.width,
            height: self.height,
        }
    }
}

/// A possibly-overlapping rectangle defining a price override.
///
/// Zones are evaluated in creation (rowid) order; the first zone fully
/// containing a quoted rectangle wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingZone {
    /// Zone identifier.
    pub id: Uuid,
    /// Operator-facing zone name.
    pub name: String,
    /// Left edge in grid units.
    pub x_start: u32,
    /// Top edge in grid units.
    pub y_start: u32,
    /// Width in grid units.
    pub width: u32,
    /// Height in grid units.
    pub height: u32,
    /// Price per grid unit in cents inside this zone.
    pub price_per_unit_cents: i64,
    /// Reserved for future sale locking; stored but not enforced.
    pub locked: bool,
    /// Marketing flag; stored but not enforced.
    pub premium: bool,
}

impl PricingZone {
    /// The rectangle this zone covers.
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.x_start,
            y: self.y_start,
            width: self.width,
            height: self.height,
        }
    }
}

/// Optional hover card shown over published content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverMeta {
    /// Hover title.
    pub title: Option<String>,
    /// Hover description.
    pub description: Option<String>,
    /// Hover call-to-action label.
    pub cta: Option<String>,
}

/// Submitted content attached to a region.
///
/// At most one submission per region is *active*; resubmission supersedes
/// it for decision purposes while history rows persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Submission identifier.
    pub id: Uuid,
    /// Owning region.
    pub region_id: Uuid,
    /// Object storage key of the image payload.
    pub object_key: String,
    /// SHA-256 content fingerprint (lowercase hex).
    pub fingerprint: String,
    /// Destination link.
    pub link_url: String,
    /// Hover card metadata.
    pub hover: HoverMeta,
    /// Monotonically increasing per-region version, starting at 1.
    pub version: i64,
    /// Creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

/// One recorded content-safety verdict. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// Verdict identifier.
    pub id: Uuid,
    /// The submission this verdict was computed for.
    pub submission_id: Uuid,
    /// Which check produced it.
    pub kind: CheckKind,
    /// Whether the check flagged the content.
    pub flagged: bool,
    /// Normalised confidence in 0..=1, when the check reports one.
    pub confidence: Option<f64>,
    /// Category tags attached by the check.
    pub categories: Vec<String>,
    /// Raw provider result, or an error marker for fail-open recoveries.
    pub raw: serde_json::Value,
    /// Check timestamp (set by SQLite on insert).
    pub checked_at: Option<String>,
}

/// An append-only ban registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanEntry {
    /// Ban identifier.
    pub id: Uuid,
    /// What kind of fingerprint is banned.
    pub kind: BanKind,
    /// The banned value (hash hex, domain substring, or keyword).
    pub value: String,
    /// Why it was banned.
    pub reason: Option<String>,
    /// Actor identity that created the ban.
    pub created_by: Option<String>,
    /// Creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

/// A payment record correlated to a region via the provider reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment identifier.
    pub id: Uuid,
    /// The region this payment is for.
    pub region_id: Uuid,
    /// Unique payment-provider reference.
    pub reference: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Settlement status.
    pub status: PaymentStatus,
    /// Settlement timestamp.
    pub paid_at: Option<String>,
    /// Refund timestamp.
    pub refunded_at: Option<String>,
    /// Creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

/// An append-only audit record tying a state change to an actor identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActionRecord {
    /// Action identifier.
    pub id: Uuid,
    /// Actor identity.
    pub actor: String,
    /// What was done.
    pub kind: AdminActionKind,
    /// What kind of thing it was done to.
    pub target_kind: TargetKind,
    /// Target identifier (region id, domain, hash, or keyword).
    pub target_id: Option<String>,
    /// Stated reason.
    pub reason: Option<String>,
    /// Creation timestamp (set by SQLite on insert).
    pub created_at: Option<String>,
}

impl AdminActionRecord {
    /// Build a new audit record with a fresh id; timestamp is set on insert.
    pub fn new(
        actor: impl Into<String>,
        kind: AdminActionKind,
        target_kind: TargetKind,
        target_id: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            kind,
            target_kind,
            target_id,
            reason,
            created_at: None,
        }
    }
}

/// An administrative decision applied atomically with its audit record.
#[derive(Debug)]
pub struct AdminDecision {
    /// Target region.
    pub region_id: Uuid,
    /// Status the region must currently be in.
    pub expect: RegionStatus,
    /// Status to transition to.
    pub to: RegionStatus,
    /// Rejection/removal reason to record on the region, if any.
    pub rejection_reason: Option<String>,
    /// Whether to stamp `approved_at` on the transition.
    pub set_approved_at: bool,
    /// The audit record committed in the same transaction.
    pub action: AdminActionRecord,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Write channel is closed (writer actor stopped).
    #[error("store writer channel closed")]
    WriterClosed,

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A stored id failed to parse as a UUID.
    #[error("invalid {field} id: {value:?}")]
    InvalidId {
        /// Which field contained the bad id.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },

    /// A stored integer does not fit the domain type.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Which field was out of range.
        field: &'static str,
        /// The stored value.
        value: i64,
    },

    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// A reservation overlaps existing blocking regions.
    #[error("rectangle conflicts with {} existing region(s)", .0.len())]
    RegionConflict(Vec<Region>),

    /// The `(kind, value)` ban pair already exists.
    #[error("ban already exists for {kind} {value:?}")]
    DuplicateBan {
        /// Ban kind.
        kind: BanKind,
        /// Banned value.
        value: String,
    },

    /// The payment reference was already recorded or already settled.
    #[error("duplicate payment reference {reference:?}")]
    DuplicateReference {
        /// The offending reference.
        reference: String,
    },

    /// A guarded transition found the region in the wrong state.
    #[error("region {region} is not {expected} (found {actual})")]
    StatusPrecondition {
        /// Target region.
        region: Uuid,
        /// Status the operation required.
        expected: RegionStatus,
        /// Status actually found.
        actual: RegionStatus,
    },
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const REGION_COLS: &str = "id, x_start, y_start, width, height, price_cents, buyer_email, \
     edit_credential, status, rejection_reason, active_submission_id, purchased_at, \
     approved_at, expires_at, updated_at";

#[derive(sqlx::FromRow)]
struct RegionRow {
    id: String,
    x_start: i64,
    y_start: i64,
    width: i64,
    height: i64,
    price_cents: i64,
    buyer_email: String,
    edit_credential: String,
    status: String,
    rejection_reason: Option<String>,
    active_submission_id: Option<String>,
    purchased_at: Option<String>,
    approved_at: Option<String>,
    expires_at: Option<String>,
    updated_at: Option<String>,
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::InvalidId {
        field,
        value: value.to_owned(),
    })
}

fn to_u32(field: &'static str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::OutOfRange { field, value })
}

impl TryFrom<RegionRow> for Region {
    type Error = StoreError;

    fn try_from(row: RegionRow) -> Result<Self, StoreError> {
        Ok(Region {
            id: parse_uuid("region.id", &row.id)?,
            x_start: to_u32("x_start", row.x_start)?,
            y_start: to_u32("y_start", row.y_start)?,
            width: to_u32("width", row.width)?,
            height: to_u32("height", row.height)?,
            price_cents: row.price_cents,
            buyer_email: row.buyer_email,
            edit_credential: row.edit_credential,
            status: RegionStatus::parse(&row.status)?,
            rejection_reason: row.rejection_reason,
            active_submission_id: row
                .active_submission_id
                .as_deref()
                .map(|s| parse_uuid("active_submission_id", s))
                .transpose()?,
            purchased_at: row.purchased_at,
            approved_at: row.approved_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ZoneRow {
    id: String,
    name: String,
    x_start: i64,
    y_start: i64,
    width: i64,
    height: i64,
    price_per_unit_cents: i64,
    locked: i64,
    premium: i64,
}

impl TryFrom<ZoneRow> for PricingZone {
    type Error = StoreError;

    fn try_from(row: ZoneRow) -> Result<Self, StoreError> {
        Ok(PricingZone {
            id: parse_uuid("zone.id", &row.id)?,
            name: row.name,
            x_start: to_u32("x_start", row.x_start)?,
            y_start: to_u32("y_start", row.y_start)?,
            width: to_u32("width", row.width)?,
            height: to_u32("height", row.height)?,
            price_per_unit_cents: row.price_per_unit_cents,
            locked: row.locked != 0,
            premium: row.premium != 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: String,
    region_id: String,
    object_key: String,
    fingerprint: String,
    link_url: String,
    hover_title: Option<String>,
    hover_description: Option<String>,
    hover_cta: Option<String>,
    version: i64,
    created_at: Option<String>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, StoreError> {
        Ok(Submission {
            id: parse_uuid("submission.id", &row.id)?,
            region_id: parse_uuid("submission.region_id", &row.region_id)?,
            object_key: row.object_key,
            fingerprint: row.fingerprint,
            link_url: row.link_url,
            hover: HoverMeta {
                title: row.hover_title,
                description: row.hover_description,
                cta: row.hover_cta,
            },
            version: row.version,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VerdictRow {
    id: String,
    submission_id: String,
    check_kind: String,
    flagged: i64,
    confidence: Option<f64>,
    categories: String,
    raw_result: String,
    checked_at: Option<String>,
}

impl TryFrom<VerdictRow> for VerdictRecord {
    type Error = StoreError;

    fn try_from(row: VerdictRow) -> Result<Self, StoreError> {
        let categories: Vec<String> =
            serde_json::from_str(&row.categories).map_err(|_| StoreError::InvalidEnum {
                field: "categories",
                value: row.categories.clone(),
            })?;
        let raw: serde_json::Value =
            serde_json::from_str(&row.raw_result).unwrap_or(serde_json::Value::Null);
        Ok(VerdictRecord {
            id: parse_uuid("verdict.id", &row.id)?,
            submission_id: parse_uuid("verdict.submission_id", &row.submission_id)?,
            kind: CheckKind::parse(&row.check_kind)?,
            flagged: row.flagged != 0,
            confidence: row.confidence,
            categories,
            raw,
            checked_at: row.checked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BanRow {
    id: String,
    kind: String,
    value: String,
    reason: Option<String>,
    created_by: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<BanRow> for BanEntry {
    type Error = StoreError;

    fn try_from(row: BanRow) -> Result<Self, StoreError> {
        Ok(BanEntry {
            id: parse_uuid("ban.id", &row.id)?,
            kind: BanKind::parse(&row.kind)?,
            value: row.value,
            reason: row.reason,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    region_id: String,
    reference: String,
    amount_cents: i64,
    status: String,
    paid_at: Option<String>,
    refunded_at: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, StoreError> {
        Ok(PaymentRecord {
            id: parse_uuid("payment.id", &row.id)?,
            region_id: parse_uuid("payment.region_id", &row.region_id)?,
            reference: row.reference,
            amount_cents: row.amount_cents,
            status: PaymentStatus::parse(&row.status)?,
            paid_at: row.paid_at,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: String,
    actor: String,
    action_kind: String,
    target_kind: String,
    target_id: Option<String>,
    reason: Option<String>,
    created_at: Option<String>,
}

impl TryFrom<ActionRow> for AdminActionRecord {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, StoreError> {
        Ok(AdminActionRecord {
            id: parse_uuid("action.id", &row.id)?,
            actor: row.actor,
            kind: AdminActionKind::parse(&row.action_kind)?,
            target_kind: TargetKind::parse(&row.target_kind)?,
            target_id: row.target_id,
            reason: row.reason,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Writer channel capacity — bounded to provide backpressure.
const WRITER_CHANNEL_CAPACITY: usize = 256;

/// Central persistence gateway: pooled reads, serialized writes.
pub struct Store {
    /// Connection pool for reads.
    db: SqlitePool,
    /// Channel to the single-writer actor.
    writer_tx: mpsc::Sender<WriteOp>,
    /// Writer actor join handle (held so we can await on shutdown).
    writer_handle: tokio::task::JoinHandle<()>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (creating if missing) the database at `path`, apply migrations,
    /// and spawn the single-writer actor.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let db = SqlitePoolOptions::new().connect_with(opts).await?;
        Self::migrate(&db).await?;
        Ok(Self::from_pool(db))
    }

    /// Wrap an existing pool (for tests). Does not apply migrations.
    pub fn from_pool(db: SqlitePool) -> Self {
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_pool = db.clone();
        let writer_handle = tokio::spawn(writer::run_writer(writer_pool, writer_rx));
        info!("store initialised");
        Self {
            db,
            writer_tx,
            writer_handle,
        }
    }

    /// Apply the schema script to the given pool.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/001_schema.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Returns a reference to the underlying pool (for ad hoc queries in tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Gracefully shut down the writer actor.
    ///
    /// Takes the last handle, drops the sender channel, and awaits the
    /// writer task to drain. When other handles are still alive the writer
    /// keeps running until they drop.
    pub async fn shutdown(self: Arc<Self>) {
        match Arc::try_unwrap(self) {
            Ok(store) => {
                drop(store.writer_tx);
                let _ = store.writer_handle.await;
                info!("store shut down");
            }
            Err(_) => warn!("store handles still alive, deferring writer shutdown"),
        }
    }

    async fn send_op<T>(
        &self,
        op: WriteOp,
        reply_rx: oneshot::Receiver<Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        self.writer_tx
            .send(op)
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        reply_rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Fetch a region by id.
    pub async fn region(&self, id: Uuid) -> Result<Option<Region>, StoreError> {
        let sql = format!("SELECT {REGION_COLS} FROM regions WHERE id = ?1");
        let row: Option<RegionRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.map(Region::try_from).transpose()
    }

    /// Fetch a region by its edit credential.
    pub async fn region_by_credential(
        &self,
        credential: &str,
    ) -> Result<Option<Region>, StoreError> {
        let sql = format!("SELECT {REGION_COLS} FROM regions WHERE edit_credential = ?1");
        let row: Option<RegionRow> = sqlx::query_as(&sql)
            .bind(credential)
            .fetch_optional(&self.db)
            .await?;
        row.map(Region::try_from).transpose()
    }

    /// Regions holding their rectangle (`draft`, `pending_review`, or
    /// `approved`) whose rectangle intersects `rect` with positive area, in
    /// creation order. `rejected` and `removed_after_publish` regions have
    /// released their rectangle and never block.
    pub async fn blocking_regions_overlapping(
        &self,
        rect: &Rect,
    ) -> Result<Vec<Region>, StoreError> {
        Self::blocking_overlap_query(&self.db, rect).await
    }

    /// Shared overlap query. Also called by the writer actor inside the
    /// reservation critical section.
    pub(crate) async fn blocking_overlap_query(
        db: &SqlitePool,
        rect: &Rect,
    ) -> Result<Vec<Region>, StoreError> {
        let sql = format!(
            "SELECT {REGION_COLS} FROM regions \
             WHERE status IN ('draft', 'approved', 'pending_review') \
               AND x_start < ?1 AND x_start + width > ?2 \
               AND y_start < ?3 AND y_start + height > ?4 \
             ORDER BY rowid ASC"
        );
        let rows: Vec<RegionRow> = sqlx::query_as(&sql)
            .bind(i64::from(rect.x) + i64::from(rect.width))
            .bind(i64::from(rect.x))
            .bind(i64::from(rect.y) + i64::from(rect.height))
            .bind(i64::from(rect.y))
            .fetch_all(db)
            .await?;
        rows.into_iter().map(Region::try_from).collect()
    }

    /// All pricing zones in creation (rowid) order — the zone evaluation order.
    pub async fn pricing_zones(&self) -> Result<Vec<PricingZone>, StoreError> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            "SELECT id, name, x_start, y_start, width, height, price_per_unit_cents, \
             locked, premium FROM pricing_zones ORDER BY rowid ASC",
        )
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(PricingZone::try_from).collect()
    }

    /// Approved regions with their active submission, for public rendering.
    pub async fn published_regions(&self) -> Result<Vec<(Region, Option<Submission>)>, StoreError> {
        let sql = format!(
            "SELECT {REGION_COLS} FROM regions WHERE status = 'approved' ORDER BY rowid ASC"
        );
        let rows: Vec<RegionRow> = sqlx::query_as(&sql).fetch_all(&self.db).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let region = Region::try_from(row)?;
            let submission = match region.active_submission_id {
                Some(sid) => self.submission(sid).await?,
                None => None,
            };
            out.push((region, submission));
        }
        Ok(out)
    }

    /// Regions awaiting human review, oldest reservation first — the order
    /// reviewers work the queue.
    pub async fn pending_review_regions(&self) -> Result<Vec<Region>, StoreError> {
        let sql = format!(
            "SELECT {REGION_COLS} FROM regions WHERE status = 'pending_review' \
             ORDER BY rowid ASC"
        );
        let rows: Vec<RegionRow> = sqlx::query_as(&sql).fetch_all(&self.db).await?;
        rows.into_iter().map(Region::try_from).collect()
    }

    /// Fetch a submission by id.
    pub async fn submission(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let row: Option<SubmissionRow> = sqlx::query_as(
            "SELECT id, region_id, object_key, fingerprint, link_url, hover_title, \
             hover_description, hover_cta, version, created_at \
             FROM submissions WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.db)
        .await?;
        row.map(Submission::try_from).transpose()
    }

    /// All verdicts recorded for a submission, in check order.
    pub async fn verdicts_for_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Vec<VerdictRecord>, StoreError> {
        let rows: Vec<VerdictRow> = sqlx::query_as(
            "SELECT id, submission_id, check_kind, flagged, confidence, categories, \
             raw_result, checked_at FROM verdicts WHERE submission_id = ?1 ORDER BY rowid ASC",
        )
        .bind(submission_id.to_string())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(VerdictRecord::try_from).collect()
    }

    /// Whether an exact `(kind, value)` ban exists.
    pub async fn ban_exists(&self, kind: BanKind, value: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM bans WHERE kind = ?1 AND value = ?2")
                .bind(kind.as_str())
                .bind(value)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.is_some())
    }

    /// All bans of one kind, in creation order.
    pub async fn bans_of_kind(&self, kind: BanKind) -> Result<Vec<BanEntry>, StoreError> {
        let rows: Vec<BanRow> = sqlx::query_as(
            "SELECT id, kind, value, reason, created_by, created_at \
             FROM bans WHERE kind = ?1 ORDER BY rowid ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(BanEntry::try_from).collect()
    }

    /// All bans, newest first.
    pub async fn list_bans(&self) -> Result<Vec<BanEntry>, StoreError> {
        let rows: Vec<BanRow> = sqlx::query_as(
            "SELECT id, kind, value, reason, created_by, created_at \
             FROM bans ORDER BY rowid DESC",
        )
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(BanEntry::try_from).collect()
    }

    /// Audit trail, newest first.
    pub async fn admin_actions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AdminActionRecord>, StoreError> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT id, actor, action_kind, target_kind, target_id, reason, created_at \
             FROM admin_actions ORDER BY rowid DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(AdminActionRecord::try_from).collect()
    }

    /// Fetch a payment by provider reference.
    pub async fn payment_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, region_id, reference, amount_cents, status, paid_at, refunded_at, \
             created_at FROM payments WHERE reference = ?1",
        )
        .bind(reference)
        .fetch_optional(&self.db)
        .await?;
        row.map(PaymentRecord::try_from).transpose()
    }

    /// Latest payment for a region, if any.
    pub async fn latest_payment(
        &self,
        region_id: Uuid,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, region_id, reference, amount_cents, status, paid_at, refunded_at, \
             created_at FROM payments WHERE region_id = ?1 ORDER BY rowid DESC LIMIT 1",
        )
        .bind(region_id.to_string())
        .fetch_optional(&self.db)
        .await?;
        row.map(PaymentRecord::try_from).transpose()
    }

    /// Region counts per status, for operator reporting.
    pub async fn region_counts(&self) -> Result<Vec<(RegionStatus, u64)>, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, count(*) FROM regions GROUP BY status ORDER BY status")
                .fetch_all(&self.db)
                .await?;
        rows.into_iter()
            .map(|(status, count)| {
                Ok((
                    RegionStatus::parse(&status)?,
                    // count(*) is always non-negative, safe to cast.
                    count.cast_unsigned(),
                ))
            })
            .collect()
    }

    // ── Writes (via the single-writer actor) ────────────────────

    /// Atomically re-check availability and insert a `draft` region.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RegionConflict`] with the blocking regions when
    /// the rectangle is taken, or [`StoreError::WriterClosed`] if the writer
    /// actor has stopped.
    pub async fn reserve_region(&self, region: Region) -> Result<Region, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::Reserve { region, reply }, rx).await
    }

    /// Insert a pricing zone.
    pub async fn insert_zone(&self, zone: PricingZone) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::InsertZone { zone, reply }, rx).await
    }

    /// Insert a submission, assign its per-region version, and mark it as the
    /// region's active submission — all in one transaction.
    ///
    /// Returns the submission with its assigned version.
    pub async fn create_submission(
        &self,
        submission: Submission,
    ) -> Result<Submission, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::CreateSubmission { submission, reply }, rx)
            .await
    }

    /// Persist a moderation verdict. Verdicts are immutable once written.
    pub async fn record_verdict(&self, verdict: VerdictRecord) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::RecordVerdict { verdict, reply }, rx)
            .await
    }

    /// Insert a ban entry, with its audit record in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateBan`] if the `(kind, value)` pair exists.
    pub async fn insert_ban(
        &self,
        ban: BanEntry,
        action: AdminActionRecord,
    ) -> Result<BanEntry, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::InsertBan { ban, action, reply }, rx)
            .await
    }

    /// Insert a payment record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateReference`] if the reference exists.
    pub async fn insert_payment(&self, payment: PaymentRecord) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::InsertPayment { payment, reply }, rx)
            .await
    }

    /// Mark a pending payment as succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown reference, or
    /// [`StoreError::DuplicateReference`] if it was already settled.
    pub async fn settle_payment(&self, reference: &str) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(
            WriteOp::SettlePayment {
                reference: reference.to_owned(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Mark a payment refunded and force its `approved` region to `rejected`,
    /// in one transaction.
    pub async fn refund_payment(
        &self,
        reference: &str,
        reason: &str,
        action: AdminActionRecord,
    ) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(
            WriteOp::RefundPayment {
                reference: reference.to_owned(),
                reason: reason.to_owned(),
                action,
                reply,
            },
            rx,
        )
        .await
    }

    /// Apply an administrative decision and append its audit record, both in
    /// one transaction or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StatusPrecondition`] when the region is not in
    /// the expected source state, [`StoreError::NotFound`] when it is missing.
    pub async fn apply_admin_decision(&self, decision: AdminDecision) -> Result<(), StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(WriteOp::AdminDecision { decision, reply }, rx)
            .await
    }

    /// Apply a moderation outcome to a region, guarded by the active
    /// submission id so a superseded pipeline run cannot drive the
    /// transition.
    ///
    /// Returns `true` when the transition was applied, `false` when the run
    /// was stale or the region already left the moderatable states.
    pub async fn apply_moderation(
        &self,
        region_id: Uuid,
        submission_id: Uuid,
        to: RegionStatus,
        rejection_reason: Option<String>,
    ) -> Result<bool, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.send_op(
            WriteOp::ApplyModeration {
                region_id,
                submission_id,
                to,
                rejection_reason,
                reply,
            },
            rx,
        )
        .await
    }
}
