//! Tier and bundle pricing for z-credits.
//!
//! Quantity-based discounts come from [`PricingTier`]s: a tier covers an
//! inclusive quantity range and applies a flat discount percentage to the
//! whole purchase. [`BulkCreditPackage`]s are the fixed-price alternative.
//!
//! All prices here are USD as `f64` and are never rounded internally. Use
//! [`PriceQuote::rounded`] or [`PriceQuote::discounted_cents`] at the edge.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{PackageId, TierId};

/// Default price of a single credit in USD.
pub const DEFAULT_UNIT_PRICE_USD: f64 = 0.01;

/// What a tier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Subscription seat/plan quantities.
    Subscription,
    /// One-off and automatic credit purchases.
    Credit,
}

const fn default_active() -> bool {
    true
}

/// A quantity range mapped to a discount percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    /// Tier identifier.
    pub id: TierId,

    /// What purchases this tier applies to.
    pub kind: TierKind,

    /// Smallest quantity covered (inclusive).
    pub min_quantity: i64,

    /// Largest quantity covered (inclusive). `None` means unbounded.
    #[serde(default)]
    pub max_quantity: Option<i64>,

    /// Discount applied to the whole purchase, in `[0, 100]`.
    pub discount_percentage: f64,

    /// Inactive tiers are ignored during resolution.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl PricingTier {
    /// Create an active tier with a fresh identifier.
    #[must_use]
    pub fn new(
        kind: TierKind,
        min_quantity: i64,
        max_quantity: Option<i64>,
        discount_percentage: f64,
    ) -> Self {
        Self {
            id: TierId::generate(),
            kind,
            min_quantity,
            max_quantity,
            discount_percentage,
            is_active: true,
        }
    }

    /// Whether `quantity` falls inside this tier's bounds (both inclusive).
    #[must_use]
    pub fn matches(&self, quantity: i64) -> bool {
        quantity >= self.min_quantity && self.max_quantity.map_or(true, |max| quantity <= max)
    }

    /// Whether two tiers of the same kind cover at least one common quantity.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.kind != other.kind {
            return false;
        }
        let below_other_max = other.max_quantity.map_or(true, |max| self.min_quantity <= max);
        let other_below_max = self.max_quantity.map_or(true, |max| other.min_quantity <= max);
        below_other_max && other_below_max
    }

    /// Check the tier's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a negative minimum, an inverted range or a
    /// discount outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_quantity < 0 {
            return Err(ValidationError::out_of_range(
                "min_quantity",
                self.min_quantity,
                "must be >= 0",
            ));
        }
        if let Some(max) = self.max_quantity {
            if self.min_quantity > max {
                return Err(ValidationError::InvalidRange {
                    field: "quantity",
                    min: self.min_quantity,
                    max,
                });
            }
        }
        validate_percentage("discount_percentage", self.discount_percentage)
    }
}

/// A named, fixed-price bundle of credits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkCreditPackage {
    /// Package identifier.
    pub id: PackageId,

    /// Display name.
    pub name: String,

    /// Credits granted by the package.
    pub credit_amount: i64,

    /// Package price in USD.
    pub price: f64,

    /// Advertised discount versus the unit price, in `[0, 100]`.
    #[serde(default)]
    pub discount_percentage: f64,

    /// Inactive packages are never offered.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl BulkCreditPackage {
    /// Create an active package with a fresh identifier.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        credit_amount: i64,
        price: f64,
        discount_percentage: f64,
    ) -> Self {
        Self {
            id: PackageId::generate(),
            name: name.into(),
            credit_amount,
            price,
            discount_percentage,
            is_active: true,
        }
    }

    /// Price of one credit inside this package.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn price_per_credit(&self) -> f64 {
        self.price / self.credit_amount as f64
    }

    /// Check the package's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the credit amount or price is not
    /// positive, or the discount is outside `[0, 100]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Empty { field: "name" });
        }
        if self.credit_amount <= 0 {
            return Err(ValidationError::out_of_range(
                "credit_amount",
                self.credit_amount,
                "must be > 0",
            ));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::out_of_range("price", self.price, "must be > 0"));
        }
        validate_percentage("discount_percentage", self.discount_percentage)
    }
}

fn validate_percentage(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::out_of_range(
            field,
            value,
            "must be within [0, 100]",
        ))
    }
}

/// The result of pricing a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Undiscounted price in USD.
    pub original_price: f64,
    /// Price after discount in USD.
    pub discounted_price: f64,
    /// Discount that was applied, in `[0, 100]`.
    pub discount_percentage: f64,
    /// `original_price - discounted_price`.
    pub savings: f64,
}

impl PriceQuote {
    /// Round every monetary field to 2 decimals for display.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            original_price: round_cents(self.original_price),
            discounted_price: round_cents(self.discounted_price),
            discount_percentage: round_cents(self.discount_percentage),
            savings: round_cents(self.savings),
        }
    }

    /// Discounted price as integer cents, rounded half away from zero.
    #[must_use]
    pub fn discounted_cents(&self) -> i64 {
        usd_to_cents(self.discounted_price)
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Convert USD to integer cents, rounding half away from zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn usd_to_cents(usd: f64) -> i64 {
    (usd * 100.0).round() as i64
}

/// Highest `min_quantity` wins; equal minimums keep the earlier tier.
fn pick_tier<'a>(
    tiers: impl Iterator<Item = &'a PricingTier>,
    quantity: i64,
) -> Option<&'a PricingTier> {
    tiers
        .filter(|tier| tier.is_active && tier.matches(quantity))
        .fold(None, |best: Option<&PricingTier>, tier| match best {
            Some(current) if current.min_quantity >= tier.min_quantity => Some(current),
            _ => Some(tier),
        })
}

/// Find the active tier covering `quantity`.
///
/// Bounds are inclusive on both ends. When tiers overlap, the one with the
/// highest `min_quantity` wins, and among equal minimums the first in `tiers`.
/// Returns `None` when no active tier covers the quantity.
#[must_use]
pub fn resolve_tier(tiers: &[PricingTier], quantity: i64) -> Option<&PricingTier> {
    pick_tier(tiers.iter(), quantity)
}

/// Price `quantity` units at `unit_price`, applying `tier`'s discount if any.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_price(quantity: i64, unit_price: f64, tier: Option<&PricingTier>) -> PriceQuote {
    let original_price = quantity as f64 * unit_price;

    match tier {
        None => PriceQuote {
            original_price,
            discounted_price: original_price,
            discount_percentage: 0.0,
            savings: 0.0,
        },
        Some(tier) => {
            let discounted_price = original_price * (1.0 - tier.discount_percentage / 100.0);
            PriceQuote {
                original_price,
                discounted_price,
                discount_percentage: tier.discount_percentage,
                savings: original_price - discounted_price,
            }
        }
    }
}

/// Pairs of active tiers of the same kind whose ranges intersect.
#[must_use]
pub fn find_overlaps(tiers: &[PricingTier]) -> Vec<(TierId, TierId)> {
    let active: Vec<&PricingTier> = tiers.iter().filter(|t| t.is_active).collect();
    let mut overlaps = Vec::new();

    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            if a.overlaps(b) {
                overlaps.push((a.id, b.id));
            }
        }
    }

    overlaps
}

/// A read-only pricing snapshot: unit price, tiers and packages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBook {
    /// Price of one credit in USD before discounts.
    pub unit_price: f64,
    /// All tiers, active or not.
    pub tiers: Vec<PricingTier>,
    /// All bulk packages, active or not.
    pub packages: Vec<BulkCreditPackage>,
}

impl Default for PriceBook {
    fn default() -> Self {
        Self::new(DEFAULT_UNIT_PRICE_USD)
    }
}

impl PriceBook {
    /// An empty book at the given unit price.
    #[must_use]
    pub fn new(unit_price: f64) -> Self {
        Self {
            unit_price,
            tiers: Vec::new(),
            packages: Vec::new(),
        }
    }

    /// Replace the tiers.
    #[must_use]
    pub fn with_tiers(mut self, tiers: Vec<PricingTier>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Replace the packages.
    #[must_use]
    pub fn with_packages(mut self, packages: Vec<BulkCreditPackage>) -> Self {
        self.packages = packages;
        self
    }

    /// Resolve the tier of `kind` covering `quantity`. Same tie-break as [`resolve_tier`].
    #[must_use]
    pub fn resolve(&self, kind: TierKind, quantity: i64) -> Option<&PricingTier> {
        pick_tier(self.tiers.iter().filter(|t| t.kind == kind), quantity)
    }

    /// Price `quantity` units of `kind` using the matching tier, if any.
    #[must_use]
    pub fn quote(&self, kind: TierKind, quantity: i64) -> PriceQuote {
        calculate_price(quantity, self.unit_price, self.resolve(kind, quantity))
    }

    /// Compare a package's fixed price against buying its credits at the unit price.
    ///
    /// The discount percentage is derived from the two prices; a package priced
    /// above the unit rate reports zero savings.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn quote_package(&self, package: &BulkCreditPackage) -> PriceQuote {
        let original_price = package.credit_amount as f64 * self.unit_price;
        let savings = (original_price - package.price).max(0.0);
        let discount_percentage = if original_price > 0.0 {
            savings / original_price * 100.0
        } else {
            0.0
        };

        PriceQuote {
            original_price,
            discounted_price: package.price,
            discount_percentage,
            savings,
        }
    }

    /// The active package that covers at least `credits` at the lowest price per credit.
    ///
    /// Equal per-credit prices prefer the smaller bundle.
    #[must_use]
    pub fn best_package(&self, credits: i64) -> Option<&BulkCreditPackage> {
        self.packages
            .iter()
            .filter(|p| p.is_active && p.credit_amount > 0 && p.credit_amount >= credits)
            .min_by(|a, b| {
                a.price_per_credit()
                    .total_cmp(&b.price_per_credit())
                    .then(a.credit_amount.cmp(&b.credit_amount))
            })
    }

    /// Check the unit price and every tier and package.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.unit_price.is_finite() || self.unit_price <= 0.0 {
            return Err(ValidationError::out_of_range(
                "unit_price",
                self.unit_price,
                "must be > 0",
            ));
        }
        self.tiers.iter().try_for_each(PricingTier::validate)?;
        self.packages.iter().try_for_each(BulkCreditPackage::validate)
    }
}
