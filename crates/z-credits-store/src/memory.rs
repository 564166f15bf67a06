//! In-memory storage implementation.
//!
//! All state sits behind one `RwLock`, so every trait method is trivially atomic.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use z_credits_core::{
    AlertEventId, AlertRecord, AlertSetting, BulkCreditPackage, CreditTransaction,
    CreditTransfer, PackageId, PricingTier, TierId, TopupId, TopupRecord, TopupSetting,
    TransactionId, UserId,
};

use crate::error::{checked_balance, next_version, Result, StoreError};
use crate::{sort_packages, sort_tiers, Store, Versioned};

#[derive(Default)]
struct Inner {
    tiers: HashMap<TierId, PricingTier>,
    packages: HashMap<PackageId, BulkCreditPackage>,
    topup_settings: HashMap<UserId, Versioned<TopupSetting>>,
    alert_settings: HashMap<UserId, Versioned<AlertSetting>>,
    balances: HashMap<UserId, i64>,
    // Keyed by id like the RocksDB backend, so both list in the same order.
    transactions: HashMap<UserId, BTreeMap<TransactionId, CreditTransaction>>,
    topup_records: HashMap<UserId, BTreeMap<TopupId, TopupRecord>>,
    alert_records: HashMap<UserId, BTreeMap<AlertEventId, AlertRecord>>,
}

impl Inner {
    fn apply(&mut self, transaction: &CreditTransaction) -> Result<i64> {
        let current = self.balances.get(&transaction.user_id).copied().unwrap_or(0);
        let balance = checked_balance(current, transaction.amount)?;

        let mut stored = transaction.clone();
        stored.balance_after = balance;

        self.balances.insert(transaction.user_id, balance);
        self.transactions
            .entry(transaction.user_id)
            .or_default()
            .insert(stored.id, stored);

        Ok(balance)
    }
}

/// Volatile storage for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Pricing
    // =========================================================================

    fn put_tier(&self, tier: &PricingTier) -> Result<()> {
        self.inner.write().tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    fn get_tier(&self, id: &TierId) -> Result<Option<PricingTier>> {
        Ok(self.inner.read().tiers.get(id).cloned())
    }

    fn list_tiers(&self) -> Result<Vec<PricingTier>> {
        let mut tiers: Vec<_> = self.inner.read().tiers.values().cloned().collect();
        sort_tiers(&mut tiers);
        Ok(tiers)
    }

    fn delete_tier(&self, id: &TierId) -> Result<()> {
        self.inner
            .write()
            .tiers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                entity: "tier",
                id: id.to_string(),
            })
    }

    fn put_package(&self, package: &BulkCreditPackage) -> Result<()> {
        self.inner
            .write()
            .packages
            .insert(package.id, package.clone());
        Ok(())
    }

    fn list_packages(&self) -> Result<Vec<BulkCreditPackage>> {
        let mut packages: Vec<_> = self.inner.read().packages.values().cloned().collect();
        sort_packages(&mut packages);
        Ok(packages)
    }

    fn delete_package(&self, id: &PackageId) -> Result<()> {
        self.inner
            .write()
            .packages
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                entity: "package",
                id: id.to_string(),
            })
    }

    // =========================================================================
    // Settings
    // =========================================================================

    fn get_topup_setting(&self, user_id: &UserId) -> Result<Option<Versioned<TopupSetting>>> {
        Ok(self.inner.read().topup_settings.get(user_id).cloned())
    }

    fn list_topup_settings(&self) -> Result<Vec<Versioned<TopupSetting>>> {
        Ok(self.inner.read().topup_settings.values().cloned().collect())
    }

    fn save_topup_setting(
        &self,
        setting: &TopupSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<TopupSetting>> {
        let mut inner = self.inner.write();
        let actual = inner
            .topup_settings
            .get(&setting.user_id)
            .map(|v| v.version);
        let version = next_version("topup_setting", setting.user_id, actual, expected_version)?;

        let record = Versioned {
            version,
            value: setting.clone(),
        };
        inner.topup_settings.insert(setting.user_id, record.clone());
        Ok(record)
    }

    fn get_alert_setting(&self, user_id: &UserId) -> Result<Option<Versioned<AlertSetting>>> {
        Ok(self.inner.read().alert_settings.get(user_id).cloned())
    }

    fn list_alert_settings(&self) -> Result<Vec<Versioned<AlertSetting>>> {
        Ok(self.inner.read().alert_settings.values().cloned().collect())
    }

    fn save_alert_setting(
        &self,
        setting: &AlertSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<AlertSetting>> {
        let mut inner = self.inner.write();
        let actual = inner
            .alert_settings
            .get(&setting.user_id)
            .map(|v| v.version);
        let version = next_version("alert_setting", setting.user_id, actual, expected_version)?;

        let record = Versioned {
            version,
            value: setting.clone(),
        };
        inner.alert_settings.insert(setting.user_id, record.clone());
        Ok(record)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    fn get_balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.inner.read().balances.get(user_id).copied().unwrap_or(0))
    }

    fn apply_transaction(&self, transaction: &CreditTransaction) -> Result<i64> {
        self.inner.write().apply(transaction)
    }

    fn transfer(&self, transfer: &CreditTransfer) -> Result<(i64, i64)> {
        transfer.validate()?;
        let (out, incoming) = CreditTransaction::transfer_legs(transfer);

        let mut inner = self.inner.write();
        // The debit is checked first; if it fails nothing has been written.
        let sender = inner.apply(&out)?;
        let recipient = inner.apply(&incoming)?;
        Ok((sender, recipient))
    }

    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        Ok(self
            .inner
            .read()
            .transactions
            .get(user_id)
            .map(|txs| txs.values().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    // =========================================================================
    // History
    // =========================================================================

    fn put_topup_record(&self, record: &TopupRecord) -> Result<()> {
        self.inner
            .write()
            .topup_records
            .entry(record.user_id)
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    fn list_topup_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<TopupRecord>> {
        Ok(self
            .inner
            .read()
            .topup_records
            .get(user_id)
            .map(|records| records.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn put_alert_record(&self, record: &AlertRecord) -> Result<()> {
        self.inner
            .write()
            .alert_records
            .entry(record.user_id)
            .or_default()
            .insert(record.id, record.clone());
        Ok(())
    }

    fn list_alert_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<AlertRecord>> {
        Ok(self
            .inner
            .read()
            .alert_records
            .get(user_id)
            .map(|records| records.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
