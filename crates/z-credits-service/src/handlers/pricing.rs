//! Pricing handlers: quotes, tiers and bulk packages.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use z_credits_core::{
    find_overlaps, BulkCreditPackage, PackageId, PriceQuote, PricingTier, TierId, TierKind,
    ValidationError,
};

use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

fn default_kind() -> TierKind {
    TierKind::Credit
}

fn default_true() -> bool {
    true
}

/// Quote request.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// Quantity to price.
    pub quantity: i64,
    /// Which tier table to use (default: credit).
    #[serde(default = "default_kind")]
    pub kind: TierKind,
}

/// A bulk package offered alongside a tier quote.
#[derive(Debug, Serialize)]
pub struct PackageOffer {
    /// The package.
    pub package: BulkCreditPackage,
    /// Its price compared with buying at the unit rate.
    #[serde(flatten)]
    pub quote: PriceQuote,
}

/// Quote response. Prices are rounded to cents.
#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    /// Quantity priced.
    pub quantity: i64,
    /// Tier table used.
    pub kind: TierKind,
    /// Unit price in USD.
    pub unit_price: f64,
    /// Tier applied, if any.
    pub tier: Option<PricingTier>,
    /// The price.
    #[serde(flatten)]
    pub quote: PriceQuote,
    /// Cheapest package covering the quantity, for credit quotes.
    pub best_package: Option<PackageOffer>,
}

/// Price a quantity against the current tiers.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, ApiError> {
    if body.quantity < 0 {
        return Err(ValidationError::OutOfRange {
            field: "quantity",
            value: body.quantity.to_string(),
            reason: "must be >= 0",
        }
        .into());
    }

    let book = state.store.price_book(state.config.unit_price_usd)?;
    let tier = book.resolve(body.kind, body.quantity).cloned();
    let quote = book.quote(body.kind, body.quantity).rounded();

    let best_package = match body.kind {
        TierKind::Credit => book.best_package(body.quantity).map(|package| PackageOffer {
            quote: book.quote_package(package).rounded(),
            package: package.clone(),
        }),
        TierKind::Subscription => None,
    };

    Ok(Json(QuoteResponse {
        quantity: body.quantity,
        kind: body.kind,
        unit_price: book.unit_price,
        tier,
        quote,
        best_package,
    }))
}

/// List all tiers, ascending by minimum quantity.
pub async fn list_tiers(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Result<Json<Vec<PricingTier>>, ApiError> {
    Ok(Json(state.store.list_tiers()?))
}

/// Create or replace a tier.
#[derive(Debug, Deserialize)]
pub struct TierInput {
    /// Existing tier to replace; a new ID is generated when absent.
    pub id: Option<TierId>,
    /// Tier table.
    pub kind: TierKind,
    /// Inclusive lower bound.
    pub min_quantity: i64,
    /// Inclusive upper bound; unbounded when absent.
    pub max_quantity: Option<i64>,
    /// Discount in percent.
    pub discount_percentage: f64,
    /// Whether the tier is applied.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Tier write response.
#[derive(Debug, Serialize)]
pub struct TierResponse {
    /// The stored tier.
    pub tier: PricingTier,
    /// Active tiers of the same kind whose ranges intersect this one.
    pub overlaps_with: Vec<TierId>,
}

/// Create or replace a tier. Overlaps are reported, not rejected.
pub async fn upsert_tier(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<TierInput>,
) -> Result<Json<TierResponse>, ApiError> {
    let mut tier = PricingTier::new(
        body.kind,
        body.min_quantity,
        body.max_quantity,
        body.discount_percentage,
    );
    if let Some(id) = body.id {
        tier.id = id;
    }
    tier.is_active = body.is_active;
    tier.validate()?;

    state.store.put_tier(&tier)?;

    let overlaps_with: Vec<TierId> = find_overlaps(&state.store.list_tiers()?)
        .into_iter()
        .filter_map(|(a, b)| {
            if a == tier.id {
                Some(b)
            } else if b == tier.id {
                Some(a)
            } else {
                None
            }
        })
        .collect();

    if !overlaps_with.is_empty() {
        tracing::warn!(
            tier_id = %tier.id,
            overlaps = overlaps_with.len(),
            "Tier overlaps existing tiers; the highest minimum quantity wins"
        );
    }
    tracing::info!(admin_id = %auth.admin_id, tier_id = %tier.id, "Tier saved");

    Ok(Json(TierResponse {
        tier,
        overlaps_with,
    }))
}

/// Delete a tier.
pub async fn delete_tier(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: TierId = id.parse()?;
    state.store.delete_tier(&id)?;

    tracing::info!(admin_id = %auth.admin_id, tier_id = %id, "Tier deleted");

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// List all packages, ascending by size.
pub async fn list_packages(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Result<Json<Vec<BulkCreditPackage>>, ApiError> {
    Ok(Json(state.store.list_packages()?))
}

/// Create or replace a package.
#[derive(Debug, Deserialize)]
pub struct PackageInput {
    /// Existing package to replace; a new ID is generated when absent.
    pub id: Option<PackageId>,
    /// Display name.
    pub name: String,
    /// Credits in the bundle.
    pub credit_amount: i64,
    /// Bundle price in USD.
    pub price: f64,
    /// Advertised discount in percent.
    #[serde(default)]
    pub discount_percentage: f64,
    /// Whether the package is on sale.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Create or replace a package.
pub async fn upsert_package(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Json(body): Json<PackageInput>,
) -> Result<Json<BulkCreditPackage>, ApiError> {
    let mut package = BulkCreditPackage::new(
        body.name,
        body.credit_amount,
        body.price,
        body.discount_percentage,
    );
    if let Some(id) = body.id {
        package.id = id;
    }
    package.is_active = body.is_active;
    package.validate()?;

    state.store.put_package(&package)?;

    tracing::info!(admin_id = %auth.admin_id, package_id = %package.id, "Package saved");

    Ok(Json(package))
}

/// Delete a package.
pub async fn delete_package(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: PackageId = id.parse()?;
    state.store.delete_package(&id)?;

    tracing::info!(admin_id = %auth.admin_id, package_id = %id, "Package deleted");

    Ok(Json(serde_json::json!({ "deleted": true })))
}
