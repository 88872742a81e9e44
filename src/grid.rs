//! Spatial grid allocator.
//!
//! Owns the canvas coordinate space: validates rectangle geometry, detects
//! overlap against existing reservations, computes the price from pricing
//! zones, and reserves rectangles atomically through the store's
//! single-writer actor. Two concurrent reservations of overlapping
//! rectangles can never both succeed.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CanvasConfig;
use crate::store::{Region, RegionStatus, Store, StoreError};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// An axis-aligned rectangle in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width; must be positive.
    pub width: u32,
    /// Height; must be positive.
    pub height: u32,
}

impl Rect {
    /// Build a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn x_end(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    /// Exclusive bottom edge.
    pub fn y_end(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    /// Area in grid units.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether the rectangles intersect with positive area.
    ///
    /// Half-open interval semantics: touching edges do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        u64::from(self.x) < other.x_end()
            && self.x_end() > u64::from(other.x)
            && u64::from(self.y) < other.y_end()
            && self.y_end() > u64::from(other.y)
    }

    /// Whether `other` lies fully inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        u64::from(other.x) >= u64::from(self.x)
            && u64::from(other.y) >= u64::from(self.y)
            && other.x_end() <= self.x_end()
            && other.y_end() <= self.y_end()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} at ({}, {})",
            self.width, self.height, self.x, self.y
        )
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from allocator operations.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Rectangle extends past the canvas edge.
    #[error("rectangle {rect} exceeds canvas bounds ({canvas_width}x{canvas_height})")]
    OutOfBounds {
        /// The offending rectangle.
        rect: Rect,
        /// Canvas width.
        canvas_width: u32,
        /// Canvas height.
        canvas_height: u32,
    },

    /// Dimensions are zero or not multiples of the minimum unit.
    #[error("rectangle {rect} dimensions must be positive multiples of {unit}")]
    BadDimensions {
        /// The offending rectangle.
        rect: Rect,
        /// The configured minimum unit.
        unit: u32,
    },

    /// The rectangle overlaps existing blocking reservations.
    #[error("rectangle unavailable: {} conflicting region(s)", conflicts.len())]
    Unavailable {
        /// The blocking regions, in creation order.
        conflicts: Vec<Region>,
    },

    /// The computed price is zero or negative.
    #[error("computed price must be positive, got {cents} cents")]
    InvalidPrice {
        /// The computed amount.
        cents: i64,
    },

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

/// Availability report for a candidate rectangle.
#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    /// Whether the rectangle can be reserved.
    pub available: bool,
    /// The blocking regions when unavailable, in creation order.
    pub conflicts: Vec<Region>,
}

/// A price quote for a candidate rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Effective price per grid unit in cents.
    pub price_per_unit_cents: i64,
    /// Total price in cents (`area × price_per_unit`).
    pub total_cents: i64,
}

/// The spatial grid allocator.
///
/// Reads (`check_availability`, `quote_price`) run unsynchronised against a
/// snapshot; `reserve` funnels through the store's writer actor.
#[derive(Debug, Clone)]
pub struct GridAllocator {
    canvas: CanvasConfig,
    store: Arc<Store>,
}

impl GridAllocator {
    /// Build an allocator over the given canvas and store.
    pub fn new(canvas: CanvasConfig, store: Arc<Store>) -> Self {
        Self { canvas, store }
    }

    /// The canvas geometry this allocator owns.
    pub fn canvas(&self) -> &CanvasConfig {
        &self.canvas
    }

    /// Validate rectangle geometry against the canvas.
    ///
    /// # Errors
    ///
    /// [`GridError::BadDimensions`] when a dimension is zero or not a
    /// multiple of the minimum unit; [`GridError::OutOfBounds`] when the
    /// rectangle extends past the canvas edge.
    pub fn validate(&self, rect: &Rect) -> Result<(), GridError> {
        let unit = self.canvas.min_unit;
        if rect.width == 0
            || rect.height == 0
            || (unit > 0 && (rect.width % unit != 0 || rect.height % unit != 0))
        {
            return Err(GridError::BadDimensions { rect: *rect, unit });
        }
        if rect.x_end() > u64::from(self.canvas.width) || rect.y_end() > u64::from(self.canvas.height)
        {
            return Err(GridError::OutOfBounds {
                rect: *rect,
                canvas_width: self.canvas.width,
                canvas_height: self.canvas.height,
            });
        }
        Ok(())
    }

    /// Report whether `rect` can be reserved and which regions block it.
    ///
    /// Regions in `draft`, `pending_review`, or `approved` hold their
    /// rectangle; `rejected` and `removed_after_publish` release it, so a
    /// released rectangle can be re-reserved.
    pub async fn check_availability(&self, rect: &Rect) -> Result<Availability, GridError> {
        self.validate(rect)?;
        let conflicts = self.store.blocking_regions_overlapping(rect).await?;
        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Quote the price for `rect`.
    ///
    /// The unit price comes from the first pricing zone (in creation order)
    /// whose bounds fully contain the rectangle, falling back to the canvas
    /// default.
    pub async fn quote_price(&self, rect: &Rect) -> Result<Quote, GridError> {
        self.validate(rect)?;
        let zones = self.store.pricing_zones().await?;
        let price_per_unit_cents = zones
            .iter()
            .find(|zone| zone.rect().contains(rect))
            .map_or(self.canvas.default_price_per_unit_cents, |zone| {
                zone.price_per_unit_cents
            });

        let area = i64::try_from(rect.area()).map_err(|_| GridError::InvalidPrice { cents: 0 })?;
        let total_cents = area
            .checked_mul(price_per_unit_cents)
            .ok_or(GridError::InvalidPrice { cents: i64::MAX })?;
        if price_per_unit_cents <= 0 || total_cents <= 0 {
            return Err(GridError::InvalidPrice { cents: total_cents });
        }
        Ok(Quote {
            price_per_unit_cents,
            total_cents,
        })
    }

    /// Reserve `rect` for a buyer.
    ///
    /// Validates geometry, quotes the price, mints a fresh edit credential,
    /// and inserts a `draft` region. The availability re-check and the
    /// insert execute atomically inside the store's writer actor.
    ///
    /// # Errors
    ///
    /// [`GridError::Unavailable`] with the conflicting set when the
    /// rectangle is taken, plus the validation and pricing errors of
    /// [`validate`](Self::validate) and [`quote_price`](Self::quote_price).
    pub async fn reserve(&self, rect: &Rect, buyer_email: &str) -> Result<Region, GridError> {
        self.validate(rect)?;
        let quote = self.quote_price(rect).await?;

        let region = Region {
            id: Uuid::new_v4(),
            x_start: rect.x,
            y_start: rect.y,
            width: rect.width,
            height: rect.height,
            price_cents: quote.total_cents,
            buyer_email: buyer_email.to_owned(),
            edit_credential: mint_edit_credential(),
            status: RegionStatus::Draft,
            rejection_reason: None,
            active_submission_id: None,
            purchased_at: None,
            approved_at: None,
            expires_at: None,
            updated_at: None,
        };

        debug!(rect = %rect, price_cents = quote.total_cents, "attempting reservation");
        match self.store.reserve_region(region).await {
            Ok(region) => {
                info!(region = %region.id, rect = %rect, "region reserved");
                Ok(region)
            }
            Err(StoreError::RegionConflict(conflicts)) => {
                debug!(rect = %rect, conflicts = conflicts.len(), "reservation conflict");
                Err(GridError::Unavailable { conflicts })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Mint a fresh unguessable edit credential: 32 random bytes, base64url.
fn mint_edit_credential() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
