//! Storage layer for z-credits.
//!
//! This crate persists pricing tiers, bulk packages, per-user top-up and alert
//! settings, the credit ledger, and top-up/alert history.
//!
//! # Versioned settings
//!
//! Settings are stored as [`Versioned`] records. Every write names the version it
//! was based on and fails with [`StoreError::VersionConflict`] if another writer
//! got there first, so concurrent processors can never silently overwrite each
//! other's `monthly_spend_cents` or `last_triggered_at`.
//!
//! # Backends
//!
//! - [`MemoryStore`]: hash maps behind a single lock, for tests and local runs.
//! - `RocksStore` (feature `rocksdb-backend`): column families with CBOR values.
//!
//! # Example
//!
//! ```
//! use z_credits_core::{CreditTransaction, UserId};
//! use z_credits_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! let tx = CreditTransaction::bonus(user_id, 500, "welcome".into());
//! assert_eq!(store.apply_transaction(&tx).unwrap(), 500);
//! assert_eq!(store.get_balance(&user_id).unwrap(), 500);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use serde::{Deserialize, Serialize};

use z_credits_core::{
    AlertRecord, AlertSetting, BulkCreditPackage, CreditTransaction, CreditTransfer, PackageId,
    PriceBook, PricingTier, TierId, TopupRecord, TopupSetting, UserId,
};

/// A record paired with its write version.
///
/// Version 1 is the first write; each successful update increments it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Current version of the record.
    pub version: u64,
    /// The record itself.
    pub value: T,
}

/// The storage trait defining all database operations.
///
/// Implementations must make each method atomic on its own: a versioned save,
/// a ledger transaction and both legs of a transfer either fully apply or not
/// at all.
pub trait Store: Send + Sync {
    // =========================================================================
    // Pricing
    // =========================================================================

    /// Insert or replace a pricing tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_tier(&self, tier: &PricingTier) -> Result<()>;

    /// Get a tier by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_tier(&self, id: &TierId) -> Result<Option<PricingTier>>;

    /// List every tier, ascending by `min_quantity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_tiers(&self) -> Result<Vec<PricingTier>>;

    /// Delete a tier.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the tier doesn't exist.
    fn delete_tier(&self, id: &TierId) -> Result<()>;

    /// Insert or replace a bulk package.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_package(&self, package: &BulkCreditPackage) -> Result<()>;

    /// List every package, ascending by `credit_amount`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_packages(&self) -> Result<Vec<BulkCreditPackage>>;

    /// Delete a package.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the package doesn't exist.
    fn delete_package(&self, id: &PackageId) -> Result<()>;

    // =========================================================================
    // Settings
    // =========================================================================

    /// Get a user's top-up setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_topup_setting(&self, user_id: &UserId) -> Result<Option<Versioned<TopupSetting>>>;

    /// List every top-up setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_topup_settings(&self) -> Result<Vec<Versioned<TopupSetting>>>;

    /// Compare-and-swap a top-up setting.
    ///
    /// `expected_version = None` creates the record and fails if it exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::VersionConflict` if the stored version differs.
    fn save_topup_setting(
        &self,
        setting: &TopupSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<TopupSetting>>;

    /// Get a user's alert setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_alert_setting(&self, user_id: &UserId) -> Result<Option<Versioned<AlertSetting>>>;

    /// List every alert setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_alert_settings(&self) -> Result<Vec<Versioned<AlertSetting>>>;

    /// Compare-and-swap an alert setting. Same contract as [`Store::save_topup_setting`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::VersionConflict` if the stored version differs.
    fn save_alert_setting(
        &self,
        setting: &AlertSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<AlertSetting>>;

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Current balance in credits; zero for users with no ledger entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, user_id: &UserId) -> Result<i64>;

    /// Apply a transaction to its user's balance and record it.
    ///
    /// Returns the new balance. The stored copy has `balance_after` filled in.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InsufficientCredits` if a debit would overdraw.
    fn apply_transaction(&self, transaction: &CreditTransaction) -> Result<i64>;

    /// Move credits between two users atomically.
    ///
    /// Returns `(sender_balance, recipient_balance)`.
    ///
    /// # Errors
    ///
    /// - `StoreError::Invalid` if the transfer fails validation.
    /// - `StoreError::InsufficientCredits` if the sender cannot cover it.
    fn transfer(&self, transfer: &CreditTransfer) -> Result<(i64, i64)>;

    /// List a user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // History
    // =========================================================================

    /// Insert or update a top-up record (keyed by its ID).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_topup_record(&self, record: &TopupRecord) -> Result<()>;

    /// List a user's top-up records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_topup_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<TopupRecord>>;

    /// Insert an alert delivery record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_alert_record(&self, record: &AlertRecord) -> Result<()>;

    /// List a user's alert records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_alert_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<AlertRecord>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Snapshot the current tiers and packages into a [`PriceBook`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn price_book(&self, unit_price: f64) -> Result<PriceBook> {
        Ok(PriceBook::new(unit_price)
            .with_tiers(self.list_tiers()?)
            .with_packages(self.list_packages()?))
    }
}

/// Order tiers ascending by `min_quantity`, then by ID for stability.
pub(crate) fn sort_tiers(tiers: &mut [PricingTier]) {
    tiers.sort_by(|a, b| a.min_quantity.cmp(&b.min_quantity).then(a.id.cmp(&b.id)));
}

/// Order packages ascending by `credit_amount`, then by ID for stability.
pub(crate) fn sort_packages(packages: &mut [BulkCreditPackage]) {
    packages.sort_by(|a, b| a.credit_amount.cmp(&b.credit_amount).then(a.id.cmp(&b.id)));
}
