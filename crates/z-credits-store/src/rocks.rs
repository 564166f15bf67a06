//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Read-modify-write sequences (versioned saves, ledger updates, transfers) run
//! under a process-wide write lock and commit through a single `WriteBatch`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use z_credits_core::{
    AlertRecord, AlertSetting, BulkCreditPackage, CreditTransaction, CreditTransfer, PackageId,
    PricingTier, TierId, TopupRecord, TopupSetting, UserId,
};

use crate::error::{checked_balance, next_version, Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{sort_packages, sort_tiers, Store, Versioned};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!("RocksDB store opened");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let value = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn delete_existing(&self, cf_name: &str, key: &[u8], entity: &'static str, id: String) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let exists = self
            .db
            .get_pinned_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if !exists {
            return Err(StoreError::NotFound { entity, id });
        }

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Deserialize every value in a column family.
    fn scan_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
                Self::deserialize(&value)
            })
            .collect()
    }

    /// Walk one user's history newest first.
    fn scan_user_newest_first<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let prefix = keys::user_prefix(user_id);
        let last = keys::user_prefix_last(user_id);

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&last, Direction::Reverse));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(value);
            if entries.len() >= offset + limit {
                break;
            }
        }

        entries
            .into_iter()
            .skip(offset)
            .map(|value| Self::deserialize(&value))
            .collect()
    }

    fn save_versioned<T>(
        &self,
        cf_name: &str,
        entity: &'static str,
        user_id: &UserId,
        value: &T,
        expected_version: Option<u64>,
    ) -> Result<Versioned<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let _guard = self.write_lock.lock();
        let key = keys::user_key(user_id);

        let actual = self
            .get_value::<Versioned<T>>(cf_name, &key)?
            .map(|record| record.version);
        let version = next_version(entity, user_id, actual, expected_version)?;

        let record = Versioned {
            version,
            value: value.clone(),
        };
        self.put_value(cf_name, &key, &record)?;
        Ok(record)
    }

    fn read_balance(&self, user_id: &UserId) -> Result<i64> {
        let cf = self.cf(cf::BALANCES)?;
        match self
            .db
            .get_pinned_cf(&cf, keys::user_key(user_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
        {
            Some(bytes) => keys::decode_balance(&bytes)
                .ok_or_else(|| StoreError::Serialization("malformed balance".into())),
            None => Ok(0),
        }
    }

    /// Add a ledger entry and its balance update to `batch`. Caller holds the write lock.
    fn stage_transaction(
        &self,
        batch: &mut WriteBatch,
        transaction: &CreditTransaction,
        current: i64,
    ) -> Result<i64> {
        let balance = checked_balance(current, transaction.amount)?;

        let mut stored = transaction.clone();
        stored.balance_after = balance;

        let cf_balances = self.cf(cf::BALANCES)?;
        let cf_transactions = self.cf(cf::TRANSACTIONS)?;
        batch.put_cf(
            &cf_balances,
            keys::user_key(&transaction.user_id),
            keys::encode_balance(balance),
        );
        batch.put_cf(
            &cf_transactions,
            keys::user_scoped_key(&transaction.user_id, transaction.id.to_bytes()),
            Self::serialize(&stored)?,
        );

        Ok(balance)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Pricing
    // =========================================================================

    fn put_tier(&self, tier: &PricingTier) -> Result<()> {
        self.put_value(cf::TIERS, &keys::id_key(tier.id.as_bytes()), tier)
    }

    fn get_tier(&self, id: &TierId) -> Result<Option<PricingTier>> {
        self.get_value(cf::TIERS, &keys::id_key(id.as_bytes()))
    }

    fn list_tiers(&self) -> Result<Vec<PricingTier>> {
        let mut tiers = self.scan_all(cf::TIERS)?;
        sort_tiers(&mut tiers);
        Ok(tiers)
    }

    fn delete_tier(&self, id: &TierId) -> Result<()> {
        self.delete_existing(cf::TIERS, &keys::id_key(id.as_bytes()), "tier", id.to_string())
    }

    fn put_package(&self, package: &BulkCreditPackage) -> Result<()> {
        self.put_value(cf::PACKAGES, &keys::id_key(package.id.as_bytes()), package)
    }

    fn list_packages(&self) -> Result<Vec<BulkCreditPackage>> {
        let mut packages = self.scan_all(cf::PACKAGES)?;
        sort_packages(&mut packages);
        Ok(packages)
    }

    fn delete_package(&self, id: &PackageId) -> Result<()> {
        self.delete_existing(
            cf::PACKAGES,
            &keys::id_key(id.as_bytes()),
            "package",
            id.to_string(),
        )
    }

    // =========================================================================
    // Settings
    // =========================================================================

    fn get_topup_setting(&self, user_id: &UserId) -> Result<Option<Versioned<TopupSetting>>> {
        self.get_value(cf::TOPUP_SETTINGS, &keys::user_key(user_id))
    }

    fn list_topup_settings(&self) -> Result<Vec<Versioned<TopupSetting>>> {
        self.scan_all(cf::TOPUP_SETTINGS)
    }

    fn save_topup_setting(
        &self,
        setting: &TopupSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<TopupSetting>> {
        self.save_versioned(
            cf::TOPUP_SETTINGS,
            "topup_setting",
            &setting.user_id,
            setting,
            expected_version,
        )
    }

    fn get_alert_setting(&self, user_id: &UserId) -> Result<Option<Versioned<AlertSetting>>> {
        self.get_value(cf::ALERT_SETTINGS, &keys::user_key(user_id))
    }

    fn list_alert_settings(&self) -> Result<Vec<Versioned<AlertSetting>>> {
        self.scan_all(cf::ALERT_SETTINGS)
    }

    fn save_alert_setting(
        &self,
        setting: &AlertSetting,
        expected_version: Option<u64>,
    ) -> Result<Versioned<AlertSetting>> {
        self.save_versioned(
            cf::ALERT_SETTINGS,
            "alert_setting",
            &setting.user_id,
            setting,
            expected_version,
        )
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    fn get_balance(&self, user_id: &UserId) -> Result<i64> {
        self.read_balance(user_id)
    }

    fn apply_transaction(&self, transaction: &CreditTransaction) -> Result<i64> {
        let _guard = self.write_lock.lock();
        let current = self.read_balance(&transaction.user_id)?;

        let mut batch = WriteBatch::default();
        let balance = self.stage_transaction(&mut batch, transaction, current)?;
        self.write(batch)?;

        Ok(balance)
    }

    fn transfer(&self, transfer: &CreditTransfer) -> Result<(i64, i64)> {
        transfer.validate()?;
        let (out, incoming) = CreditTransaction::transfer_legs(transfer);

        let _guard = self.write_lock.lock();
        let sender_current = self.read_balance(&transfer.from)?;
        let recipient_current = self.read_balance(&transfer.to)?;

        let mut batch = WriteBatch::default();
        let sender = self.stage_transaction(&mut batch, &out, sender_current)?;
        let recipient = self.stage_transaction(&mut batch, &incoming, recipient_current)?;
        self.write(batch)?;

        Ok((sender, recipient))
    }

    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.scan_user_newest_first(cf::TRANSACTIONS, user_id, limit, offset)
    }

    // =========================================================================
    // History
    // =========================================================================

    fn put_topup_record(&self, record: &TopupRecord) -> Result<()> {
        self.put_value(
            cf::TOPUP_RECORDS,
            &keys::user_scoped_key(&record.user_id, record.id.to_bytes()),
            record,
        )
    }

    fn list_topup_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<TopupRecord>> {
        self.scan_user_newest_first(cf::TOPUP_RECORDS, user_id, limit, 0)
    }

    fn put_alert_record(&self, record: &AlertRecord) -> Result<()> {
        self.put_value(
            cf::ALERT_RECORDS,
            &keys::user_scoped_key(&record.user_id, record.id.to_bytes()),
            record,
        )
    }

    fn list_alert_records(&self, user_id: &UserId, limit: usize) -> Result<Vec<AlertRecord>> {
        self.scan_user_newest_first(cf::ALERT_RECORDS, user_id, limit, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use z_credits_core::{AlertChannel, TierKind};

    fn open() -> (TempDir, RocksStore) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn tiers_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let tier = PricingTier::new(TierKind::Credit, 100, Some(499), 10.0);
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.put_tier(&tier).unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.get_tier(&tier.id).unwrap(), Some(tier.clone()));
        store.delete_tier(&tier.id).unwrap();
        assert!(matches!(
            store.delete_tier(&tier.id),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn packages_list_by_size() {
        let (_dir, store) = open();
        let big = BulkCreditPackage::new("Big", 10_000, 80.0, 20.0);
        let small = BulkCreditPackage::new("Small", 1_000, 9.0, 10.0);
        store.put_package(&big).unwrap();
        store.put_package(&small).unwrap();

        let packages = store.list_packages().unwrap();
        assert_eq!(packages[0].id, small.id);
        assert_eq!(packages[1].id, big.id);

        store.delete_package(&small.id).unwrap();
        assert_eq!(store.list_packages().unwrap().len(), 1);
    }

    #[test]
    fn versioned_settings() {
        let (_dir, store) = open();
        let setting = TopupSetting::new(UserId::generate(), 100, 500, Utc::now());

        let v1 = store.save_topup_setting(&setting, None).unwrap();
        assert_eq!(v1.version, 1);
        assert!(store.save_topup_setting(&setting, None).is_err());
        assert_eq!(store.save_topup_setting(&setting, Some(1)).unwrap().version, 2);
        assert_eq!(store.list_topup_settings().unwrap().len(), 1);

        let alert = AlertSetting::new(setting.user_id, 10, vec![AlertChannel::InApp]);
        store.save_alert_setting(&alert, None).unwrap();
        let loaded = store.get_alert_setting(&alert.user_id).unwrap().unwrap();
        assert_eq!(loaded.value, alert);
    }

    #[test]
    fn ledger_and_history_order() {
        let (_dir, store) = open();
        let user_id = UserId::generate();

        store
            .apply_transaction(&CreditTransaction::bonus(user_id, 1000, "seed".into()))
            .unwrap();
        store
            .apply_transaction(&CreditTransaction::usage(user_id, 250, "calls".into()))
            .unwrap();

        assert_eq!(store.get_balance(&user_id).unwrap(), 750);
        let history = store.list_transactions(&user_id, 10, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, -250);
        assert_eq!(history[0].balance_after, 750);

        let page = store.list_transactions(&user_id, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].amount, 1000);
    }

    #[test]
    fn history_is_isolated_per_user() {
        let (_dir, store) = open();
        let a = UserId::generate();
        let b = UserId::generate();
        store
            .apply_transaction(&CreditTransaction::bonus(a, 10, "a".into()))
            .unwrap();
        store
            .apply_transaction(&CreditTransaction::bonus(b, 20, "b".into()))
            .unwrap();

        assert_eq!(store.list_transactions(&a, 10, 0).unwrap().len(), 1);
        assert_eq!(store.list_transactions(&b, 10, 0).unwrap()[0].amount, 20);
    }

    #[test]
    fn transfer_commits_both_legs() {
        let (_dir, store) = open();
        let from = UserId::generate();
        let to = UserId::generate();
        store
            .apply_transaction(&CreditTransaction::bonus(from, 100, "seed".into()))
            .unwrap();

        let transfer = CreditTransfer {
            from,
            to,
            amount: 60,
            note: None,
        };
        assert_eq!(store.transfer(&transfer).unwrap(), (40, 60));
        assert!(matches!(
            store.transfer(&transfer),
            Err(StoreError::InsufficientCredits { .. })
        ));
        assert_eq!(store.get_balance(&to).unwrap(), 60);
    }

    #[test]
    fn records_upsert_by_id() {
        let (_dir, store) = open();
        let user_id = UserId::generate();
        let now = Utc::now();

        let mut record = TopupRecord::pending(user_id, 1000, 1000, now);
        store.put_topup_record(&record).unwrap();
        record.succeed("pay_1", now);
        store.put_topup_record(&record).unwrap();

        let records = store.list_topup_records(&user_id, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_id.as_deref(), Some("pay_1"));

        let alert = AlertRecord::delivered(user_id, AlertChannel::Email, 5, now);
        store.put_alert_record(&alert).unwrap();
        assert_eq!(store.list_alert_records(&user_id, 10).unwrap(), vec![alert]);
    }

    #[test]
    fn back_to_back_ledger_entries_list_newest_first() {
        let (_dir, store) = open();
        let user_id = UserId::generate();
        for _ in 0..300 {
            store
                .apply_transaction(&CreditTransaction::bonus(user_id, 1, "tick".into()))
                .unwrap();
        }

        let history = store.list_transactions(&user_id, 300, 0).unwrap();
        assert_eq!(history.len(), 300);
        assert_eq!(history[0].balance_after, 300);
        assert!(history
            .windows(2)
            .all(|pair| pair[0].balance_after == pair[1].balance_after + 1));
    }

    #[test]
    fn same_instant_alert_records_keep_insertion_order() {
        let (_dir, store) = open();
        let user_id = UserId::generate();
        let now = Utc::now();
        let channels = [
            AlertChannel::Email,
            AlertChannel::Sms,
            AlertChannel::Webhook,
            AlertChannel::InApp,
        ];
        for _ in 0..50 {
            for channel in channels {
                store
                    .put_alert_record(&AlertRecord::delivered(user_id, channel, 5, now))
                    .unwrap();
            }
        }

        let records = store.list_alert_records(&user_id, 200).unwrap();
        let expected: Vec<_> = channels.iter().rev().copied().cycle().take(200).collect();
        let listed: Vec<_> = records.iter().map(|r| r.channel).collect();
        assert_eq!(listed, expected);
    }
}
