//! Core types and decision logic for z-credits.
//!
//! This crate holds everything that can be decided without I/O:
//!
//! - **Identifiers**: `UserId`, `TierId`, `PackageId`, `TransactionId`, `TopupId`, `AlertEventId`
//! - **Pricing**: `PricingTier`, `BulkCreditPackage`, `PriceBook`, `resolve_tier`, `calculate_price`
//! - **Top-ups**: `TopupSetting`, `needs_topup`, `TopupRecord`
//! - **Alerts**: `AlertSetting`, `needs_alert`, `AlertRecord`
//! - **Ledger**: `CreditTransaction`, `TransactionType`, `CreditTransfer`
//!
//! # Units
//!
//! - Credit quantities and balances are whole credits (`i64`).
//! - Unit prices and quotes are USD (`f64`) and are only rounded at the boundary.
//! - Spend caps, monthly spend and charge amounts are integer cents (`i64`).

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod alert;
pub mod credits;
pub mod error;
pub mod ids;
pub mod pricing;
pub mod topup;

pub use alert::{
    low_balance_message, needs_alert, AlertChannel, AlertRecord, AlertSetting, DeliveryStatus,
    ALERT_COOLDOWN,
};
pub use credits::{CreditTransaction, CreditTransfer, TransactionType};
pub use error::{CreditError, Result, ValidationError};
pub use ids::{AlertEventId, IdError, PackageId, TierId, TopupId, TransactionId, UserId};
pub use pricing::{
    calculate_price, find_overlaps, resolve_tier, BulkCreditPackage, PriceBook, PriceQuote,
    PricingTier, TierKind, DEFAULT_UNIT_PRICE_USD,
};
pub use topup::{
    needs_topup, TopupDecision, TopupRecord, TopupSetting, TopupSkipReason, TopupStatus,
};
