//! Auto top-up processor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use z_credits_core::{
    needs_topup, CreditTransaction, TierKind, TopupId, TopupRecord, TopupSkipReason, TopupStatus,
    UserId,
};
use z_credits_store::{Store, StoreError};

use super::{UserLocks, CAS_ATTEMPTS};
use crate::payments::{ChargeRequest, PaymentGateway};

/// What happened to one user in a top-up cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TopupOutcome {
    /// The user has no top-up setting.
    NoSetting,
    /// The stored setting failed validation and was ignored.
    InvalidSetting {
        /// Validation message.
        error: String,
    },
    /// Another top-up for this user is still running.
    InFlight,
    /// No top-up was needed.
    Skipped {
        /// Why.
        reason: TopupSkipReason,
    },
    /// The user was charged and credited.
    ToppedUp {
        /// Credits added.
        credits: i64,
        /// Amount charged, in cents.
        amount_cents: i64,
        /// Balance after crediting.
        balance: i64,
        /// Provider reference for the charge.
        payment_id: String,
        /// Set when the charge could not be added to the monthly spend. The
        /// next cycle retries before charging again.
        #[serde(skip_serializing_if = "Option::is_none")]
        spend_error: Option<String>,
    },
    /// The user was charged but the credits did not reach the ledger.
    ChargedNotCredited {
        /// Attempt to reconcile.
        topup_id: TopupId,
        /// Provider reference for the charge.
        payment_id: String,
        /// Amount charged, in cents.
        amount_cents: i64,
        /// Crediting failure.
        error: String,
    },
    /// A previously half-finished attempt was completed; nothing was charged.
    Reconciled {
        /// Attempt that was completed.
        topup_id: TopupId,
        /// Balance afterwards.
        balance: i64,
    },
    /// A previous attempt is still half-finished; no new charge is made.
    Unreconciled {
        /// Attempt blocking further charges.
        topup_id: TopupId,
        /// Why it could not be completed.
        error: String,
    },
    /// The charge failed; the next cycle will try again.
    Failed {
        /// Failure detail.
        error: String,
    },
}

/// One user's result within a cycle report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTopupOutcome {
    /// User evaluated.
    pub user_id: UserId,
    /// What happened.
    #[serde(flatten)]
    pub outcome: TopupOutcome,
}

/// Summary of one top-up cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopupCycleReport {
    /// Users evaluated.
    pub users: usize,
    /// Users charged and credited.
    pub topped_up: usize,
    /// Users with nothing to do.
    pub skipped: usize,
    /// Users whose attempt failed or is still half-finished.
    pub failed: usize,
    /// Users whose earlier half-finished attempt was completed.
    pub reconciled: usize,
    /// Users skipped because a previous attempt was still running.
    pub in_flight: usize,
    /// Per-user detail.
    pub outcomes: Vec<UserTopupOutcome>,
}

impl TopupCycleReport {
    fn from_outcomes(outcomes: Vec<UserTopupOutcome>) -> Self {
        let mut report = Self {
            users: outcomes.len(),
            ..Self::default()
        };
        for entry in &outcomes {
            match entry.outcome {
                TopupOutcome::ToppedUp { .. } => report.topped_up += 1,
                TopupOutcome::Failed { .. }
                | TopupOutcome::ChargedNotCredited { .. }
                | TopupOutcome::Unreconciled { .. } => report.failed += 1,
                TopupOutcome::Reconciled { .. } => report.reconciled += 1,
                TopupOutcome::InFlight => report.in_flight += 1,
                TopupOutcome::NoSetting
                | TopupOutcome::InvalidSetting { .. }
                | TopupOutcome::Skipped { .. } => report.skipped += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }
}

/// Evaluates top-up settings and charges users who have fallen below threshold.
pub struct TopupProcessor {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentGateway>,
    locks: UserLocks,
    unit_price: f64,
    max_concurrency: usize,
}

impl TopupProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentGateway>,
        unit_price: f64,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            payments,
            locks: UserLocks::new(),
            unit_price,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run one cycle over every enabled setting.
    ///
    /// # Errors
    ///
    /// Returns an error only if the settings cannot be listed. Per-user failures
    /// are reported in the returned [`TopupCycleReport`].
    pub async fn process_all(&self, now: DateTime<Utc>) -> Result<TopupCycleReport, StoreError> {
        let users: Vec<UserId> = self
            .store
            .list_topup_settings()?
            .into_iter()
            .filter(|record| record.value.is_enabled)
            .map(|record| record.value.user_id)
            .collect();

        let outcomes: Vec<UserTopupOutcome> = stream::iter(users)
            .map(|user_id| async move {
                let outcome = self
                    .process_user(&user_id, now)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(user_id = %user_id, error = %e, "Top-up processing failed");
                        TopupOutcome::Failed {
                            error: e.to_string(),
                        }
                    });
                UserTopupOutcome { user_id, outcome }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let report = TopupCycleReport::from_outcomes(outcomes);
        tracing::info!(
            users = report.users,
            topped_up = report.topped_up,
            failed = report.failed,
            reconciled = report.reconciled,
            in_flight = report.in_flight,
            "Top-up cycle complete"
        );
        Ok(report)
    }

    /// Evaluate one user and top them up if needed.
    ///
    /// A user whose latest attempt was charged but not fully booked is never
    /// charged again; that attempt is completed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails before the charge is attempted.
    /// Charge and crediting failures are reported in the [`TopupOutcome`].
    pub async fn process_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<TopupOutcome, StoreError> {
        let Some(_guard) = self.locks.try_acquire(user_id) else {
            tracing::debug!(user_id = %user_id, "Top-up already in flight");
            return Ok(TopupOutcome::InFlight);
        };

        // Charges are blocked while an attempt is unbooked, so such an
        // attempt is always the newest record.
        if let Some(record) = self.store.list_topup_records(user_id, 1)?.into_iter().next() {
            if record.needs_reconciliation() {
                return self.reconcile(user_id, record, now);
            }
        }

        let Some(current) = self.store.get_topup_setting(user_id)? else {
            return Ok(TopupOutcome::NoSetting);
        };
        let mut setting = current.value;
        if let Err(e) = setting.validate() {
            tracing::warn!(user_id = %user_id, error = %e, "Ignoring invalid top-up setting");
            return Ok(TopupOutcome::InvalidSetting {
                error: e.to_string(),
            });
        }
        // Evaluated against the current month; persisted with the next spend.
        setting.roll_monthly_window(now);

        let balance = self.store.get_balance(user_id)?;
        let book = self.store.price_book(self.unit_price)?;
        let decision = needs_topup(balance, &setting, &book);
        if let Some(reason) = decision.reason {
            tracing::debug!(user_id = %user_id, balance, reason = %reason, "No top-up needed");
            return Ok(TopupOutcome::Skipped { reason });
        }

        let credits = setting.topup_amount;
        let amount_cents = book.quote(TierKind::Credit, credits).discounted_cents();
        let mut record = TopupRecord::pending(*user_id, credits, amount_cents, now);
        self.store.put_topup_record(&record)?;

        tracing::info!(
            user_id = %user_id,
            balance,
            credits,
            amount_cents,
            topup_id = %record.id,
            "Starting auto top-up"
        );

        let request = ChargeRequest {
            user_id: *user_id,
            payment_method_id: setting.payment_method_id.clone().unwrap_or_default(),
            amount_cents,
            idempotency_key: record.id.to_string(),
        };

        let receipt = match self.payments.charge(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(user_id = %user_id, error = %error, "Auto top-up charge failed");
                record.fail(error.clone(), now);
                self.store.put_topup_record(&record)?;
                return Ok(TopupOutcome::Failed { error });
            }
        };

        // Money has moved: from here on every step is recorded before the next.
        record.charged(receipt.payment_id.clone());
        if let Err(e) = self.store.put_topup_record(&record) {
            tracing::error!(
                user_id = %user_id,
                payment_id = %receipt.payment_id,
                error = %e,
                "Failed to mark top-up as charged"
            );
        }

        let spend_error = match self.record_spend(user_id, amount_cents, now) {
            Ok(()) => {
                record.mark_spend_recorded();
                None
            }
            Err(e) => {
                tracing::error!(
                    user_id = %user_id,
                    amount_cents,
                    error = %e,
                    "Failed to record monthly spend"
                );
                Some(e.to_string())
            }
        };

        let transaction =
            CreditTransaction::auto_topup(*user_id, credits, record.id, &receipt.payment_id);
        let balance = match self.store.apply_transaction(&transaction) {
            Ok(balance) => balance,
            Err(e) => {
                let error = format!("charged but crediting failed: {e}");
                tracing::error!(
                    user_id = %user_id,
                    payment_id = %receipt.payment_id,
                    error = %e,
                    "Auto top-up charged but not credited"
                );
                record.credit_failed(error.clone());
                self.store.put_topup_record(&record)?;
                return Ok(TopupOutcome::ChargedNotCredited {
                    topup_id: record.id,
                    payment_id: receipt.payment_id,
                    amount_cents,
                    error,
                });
            }
        };

        record.succeed(receipt.payment_id.clone(), now);
        self.store.put_topup_record(&record)?;

        tracing::info!(
            user_id = %user_id,
            credits,
            amount_cents,
            balance,
            payment_id = %receipt.payment_id,
            spend_recorded = record.spend_recorded,
            "Auto top-up succeeded"
        );

        Ok(TopupOutcome::ToppedUp {
            credits,
            amount_cents,
            balance,
            payment_id: receipt.payment_id,
            spend_error,
        })
    }

    /// Finish booking a charged attempt: monthly spend first, then credits.
    fn reconcile(
        &self,
        user_id: &UserId,
        mut record: TopupRecord,
        now: DateTime<Utc>,
    ) -> Result<TopupOutcome, StoreError> {
        tracing::info!(
            user_id = %user_id,
            topup_id = %record.id,
            status = ?record.status,
            spend_recorded = record.spend_recorded,
            "Reconciling charged top-up"
        );

        if !record.spend_recorded {
            if let Err(e) = self.record_spend(user_id, record.amount_cents, now) {
                let error = format!("spend not recorded: {e}");
                tracing::warn!(user_id = %user_id, topup_id = %record.id, error = %error, "Reconciliation failed");
                return Ok(TopupOutcome::Unreconciled {
                    topup_id: record.id,
                    error,
                });
            }
            record.mark_spend_recorded();
            self.store.put_topup_record(&record)?;
        }

        if record.status == TopupStatus::ChargedNotCredited {
            let payment_id = record.payment_id.clone().unwrap_or_default();
            let transaction =
                CreditTransaction::auto_topup(*user_id, record.credits, record.id, &payment_id);
            if let Err(e) = self.store.apply_transaction(&transaction) {
                let error = format!("charged but crediting failed: {e}");
                tracing::warn!(user_id = %user_id, topup_id = %record.id, error = %error, "Reconciliation failed");
                record.credit_failed(error.clone());
                self.store.put_topup_record(&record)?;
                return Ok(TopupOutcome::Unreconciled {
                    topup_id: record.id,
                    error,
                });
            }
            record.succeed(payment_id, now);
            self.store.put_topup_record(&record)?;
        }

        let balance = self.store.get_balance(user_id)?;
        tracing::info!(user_id = %user_id, topup_id = %record.id, balance, "Top-up reconciled");
        Ok(TopupOutcome::Reconciled {
            topup_id: record.id,
            balance,
        })
    }

    /// Add a charge to the stored monthly spend, retrying on version conflicts.
    fn record_spend(
        &self,
        user_id: &UserId,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut last_err = None;
        for _ in 0..CAS_ATTEMPTS {
            let Some(current) = self.store.get_topup_setting(user_id)? else {
                return Ok(());
            };
            let mut setting = current.value;
            setting.roll_monthly_window(now);
            setting.record_topup(amount_cents, now);

            match self.store.save_topup_setting(&setting, Some(current.version)) {
                Ok(_) => return Ok(()),
                Err(e @ StoreError::VersionConflict { .. }) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Database("spend update not attempted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::{PaymentError, PaymentReceipt};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use z_credits_core::{
        AlertRecord, AlertSetting, BulkCreditPackage, CreditTransfer, PackageId, PricingTier,
        TierId, TopupSetting, TransactionType,
    };
    use z_credits_store::{MemoryStore, Versioned};

    /// Memory store that can refuse ledger writes or every settings update.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_credits: AtomicBool,
        conflict_updates: AtomicBool,
    }

    impl Store for FlakyStore {
        fn put_tier(&self, tier: &PricingTier) -> z_credits_store::Result<()> {
            self.inner.put_tier(tier)
        }
        fn get_tier(&self, id: &TierId) -> z_credits_store::Result<Option<PricingTier>> {
            self.inner.get_tier(id)
        }
        fn list_tiers(&self) -> z_credits_store::Result<Vec<PricingTier>> {
            self.inner.list_tiers()
        }
        fn delete_tier(&self, id: &TierId) -> z_credits_store::Result<()> {
            self.inner.delete_tier(id)
        }
        fn put_package(&self, package: &BulkCreditPackage) -> z_credits_store::Result<()> {
            self.inner.put_package(package)
        }
        fn list_packages(&self) -> z_credits_store::Result<Vec<BulkCreditPackage>> {
            self.inner.list_packages()
        }
        fn delete_package(&self, id: &PackageId) -> z_credits_store::Result<()> {
            self.inner.delete_package(id)
        }
        fn get_topup_setting(
            &self,
            user_id: &UserId,
        ) -> z_credits_store::Result<Option<Versioned<TopupSetting>>> {
            self.inner.get_topup_setting(user_id)
        }
        fn list_topup_settings(&self) -> z_credits_store::Result<Vec<Versioned<TopupSetting>>> {
            self.inner.list_topup_settings()
        }
        fn save_topup_setting(
            &self,
            setting: &TopupSetting,
            expected_version: Option<u64>,
        ) -> z_credits_store::Result<Versioned<TopupSetting>> {
            if expected_version.is_some() && self.conflict_updates.load(Ordering::SeqCst) {
                return Err(StoreError::VersionConflict {
                    entity: "topup_setting",
                    id: setting.user_id.to_string(),
                    expected: expected_version,
                    actual: expected_version.map(|v| v + 1),
                });
            }
            self.inner.save_topup_setting(setting, expected_version)
        }
        fn get_alert_setting(
            &self,
            user_id: &UserId,
        ) -> z_credits_store::Result<Option<Versioned<AlertSetting>>> {
            self.inner.get_alert_setting(user_id)
        }
        fn list_alert_settings(&self) -> z_credits_store::Result<Vec<Versioned<AlertSetting>>> {
            self.inner.list_alert_settings()
        }
        fn save_alert_setting(
            &self,
            setting: &AlertSetting,
            expected_version: Option<u64>,
        ) -> z_credits_store::Result<Versioned<AlertSetting>> {
            self.inner.save_alert_setting(setting, expected_version)
        }
        fn get_balance(&self, user_id: &UserId) -> z_credits_store::Result<i64> {
            self.inner.get_balance(user_id)
        }
        fn apply_transaction(&self, transaction: &CreditTransaction) -> z_credits_store::Result<i64> {
            if self.fail_credits.load(Ordering::SeqCst) {
                return Err(StoreError::Database("disk full".into()));
            }
            self.inner.apply_transaction(transaction)
        }
        fn transfer(&self, transfer: &CreditTransfer) -> z_credits_store::Result<(i64, i64)> {
            self.inner.transfer(transfer)
        }
        fn list_transactions(
            &self,
            user_id: &UserId,
            limit: usize,
            offset: usize,
        ) -> z_credits_store::Result<Vec<CreditTransaction>> {
            self.inner.list_transactions(user_id, limit, offset)
        }
        fn put_topup_record(&self, record: &TopupRecord) -> z_credits_store::Result<()> {
            self.inner.put_topup_record(record)
        }
        fn list_topup_records(
            &self,
            user_id: &UserId,
            limit: usize,
        ) -> z_credits_store::Result<Vec<TopupRecord>> {
            self.inner.list_topup_records(user_id, limit)
        }
        fn put_alert_record(&self, record: &AlertRecord) -> z_credits_store::Result<()> {
            self.inner.put_alert_record(record)
        }
        fn list_alert_records(
            &self,
            user_id: &UserId,
            limit: usize,
        ) -> z_credits_store::Result<Vec<AlertRecord>> {
            self.inner.list_alert_records(user_id, limit)
        }
    }

    fn flaky_setup() -> (Arc<FlakyStore>, Arc<FakeGateway>, TopupProcessor) {
        let store = Arc::new(FlakyStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let processor = TopupProcessor::new(store.clone(), gateway.clone(), 0.01, 4);
        (store, gateway, processor)
    }

    fn capped_setting(store: &dyn Store, user_id: UserId) {
        let mut setting = TopupSetting::new(user_id, 100, 1000, now());
        setting.payment_method_id = Some("pm_1".into());
        setting.max_monthly_spend_cents = Some(1500);
        store.save_topup_setting(&setting, None).unwrap();
    }

    #[derive(Default)]
    struct FakeGateway {
        decline: bool,
        charges: Mutex<Vec<ChargeRequest>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError> {
            self.charges.lock().push(request.clone());
            if self.decline {
                return Err(PaymentError::Declined("card_declined".into()));
            }
            Ok(PaymentReceipt {
                payment_id: format!("pay_{}", self.charges.lock().len()),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 9, 0, 0).unwrap()
    }

    fn setup(gateway: FakeGateway) -> (Arc<MemoryStore>, Arc<FakeGateway>, TopupProcessor) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let processor = TopupProcessor::new(store.clone(), gateway.clone(), 0.01, 4);
        (store, gateway, processor)
    }

    fn enabled_setting(store: &MemoryStore, user_id: UserId) -> TopupSetting {
        let mut setting = TopupSetting::new(user_id, 100, 1000, now());
        setting.payment_method_id = Some("pm_1".into());
        store.save_topup_setting(&setting, None).unwrap();
        setting
    }

    #[tokio::test]
    async fn tops_up_below_threshold() {
        let (store, gateway, processor) = setup(FakeGateway::default());
        store
            .put_tier(&PricingTier::new(TierKind::Credit, 1000, None, 20.0))
            .unwrap();
        let user_id = UserId::generate();
        enabled_setting(&store, user_id);

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert_eq!(
            outcome,
            TopupOutcome::ToppedUp {
                credits: 1000,
                amount_cents: 800,
                balance: 1000,
                payment_id: "pay_1".into(),
                spend_error: None,
            }
        );

        let charges = gateway.charges.lock();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].amount_cents, 800);
        assert_eq!(charges[0].payment_method_id, "pm_1");

        let setting = store.get_topup_setting(&user_id).unwrap().unwrap();
        assert_eq!(setting.version, 2);
        assert_eq!(setting.value.monthly_spend_cents, 800);
        assert_eq!(setting.value.last_topup_at, Some(now()));

        let records = store.list_topup_records(&user_id, 10).unwrap();
        assert_eq!(records[0].status, TopupStatus::Succeeded);
        assert_eq!(charges[0].idempotency_key, records[0].id.to_string());

        let txs = store.list_transactions(&user_id, 10, 0).unwrap();
        assert_eq!(txs[0].transaction_type, TransactionType::AutoTopup);
    }

    #[tokio::test]
    async fn above_threshold_is_skipped() {
        let (store, gateway, processor) = setup(FakeGateway::default());
        let user_id = UserId::generate();
        enabled_setting(&store, user_id);
        store
            .apply_transaction(&CreditTransaction::bonus(user_id, 500, "seed".into()))
            .unwrap();

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert_eq!(
            outcome,
            TopupOutcome::Skipped {
                reason: TopupSkipReason::AboveThreshold
            }
        );
        assert!(gateway.charges.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_setting_is_no_action() {
        let (_store, _gateway, processor) = setup(FakeGateway::default());
        let outcome = processor
            .process_user(&UserId::generate(), now())
            .await
            .unwrap();
        assert_eq!(outcome, TopupOutcome::NoSetting);
    }

    #[tokio::test]
    async fn spend_cap_blocks_charge() {
        let (store, gateway, processor) = setup(FakeGateway::default());
        let user_id = UserId::generate();
        let mut setting = TopupSetting::new(user_id, 100, 1000, now());
        setting.payment_method_id = Some("pm_1".into());
        setting.max_monthly_spend_cents = Some(1500);
        setting.monthly_spend_cents = 1000;
        store.save_topup_setting(&setting, None).unwrap();

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(
            outcome,
            TopupOutcome::Skipped {
                reason: TopupSkipReason::SpendCapExceeded { .. }
            }
        ));
        assert!(gateway.charges.lock().is_empty());
    }

    #[tokio::test]
    async fn new_month_resets_spend_before_cap_check() {
        let (store, gateway, processor) = setup(FakeGateway::default());
        let user_id = UserId::generate();
        let april = Utc.with_ymd_and_hms(2026, 4, 3, 0, 0, 0).unwrap();
        let mut setting = TopupSetting::new(user_id, 100, 1000, april);
        setting.payment_method_id = Some("pm_1".into());
        setting.max_monthly_spend_cents = Some(1500);
        setting.monthly_spend_cents = 1000;
        store.save_topup_setting(&setting, None).unwrap();

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(outcome, TopupOutcome::ToppedUp { .. }));
        assert_eq!(gateway.charges.lock().len(), 1);

        let stored = store.get_topup_setting(&user_id).unwrap().unwrap().value;
        assert_eq!(stored.monthly_spend_cents, 1000);
        assert!(stored.monthly_spend_reset_at > now());
    }

    #[tokio::test]
    async fn declined_charge_is_recorded_not_retried() {
        let (store, gateway, processor) = setup(FakeGateway {
            decline: true,
            ..FakeGateway::default()
        });
        let user_id = UserId::generate();
        enabled_setting(&store, user_id);

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(outcome, TopupOutcome::Failed { .. }));
        assert_eq!(gateway.charges.lock().len(), 1);
        assert_eq!(store.get_balance(&user_id).unwrap(), 0);

        let records = store.list_topup_records(&user_id, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TopupStatus::Failed);
        assert!(records[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("card_declined"));

        let setting = store.get_topup_setting(&user_id).unwrap().unwrap();
        assert_eq!(setting.version, 1);
        assert_eq!(setting.value.monthly_spend_cents, 0);
    }

    #[tokio::test]
    async fn in_flight_user_is_not_charged_twice() {
        let (store, gateway, processor) = setup(FakeGateway::default());
        let user_id = UserId::generate();
        enabled_setting(&store, user_id);

        let _held = processor.locks.try_acquire(&user_id).unwrap();
        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert_eq!(outcome, TopupOutcome::InFlight);
        assert!(gateway.charges.lock().is_empty());
    }

    #[tokio::test]
    async fn cycle_isolates_failures() {
        let (store, _gateway, processor) = setup(FakeGateway::default());
        let low = UserId::generate();
        let funded = UserId::generate();
        enabled_setting(&store, low);
        enabled_setting(&store, funded);
        store
            .apply_transaction(&CreditTransaction::bonus(funded, 5000, "seed".into()))
            .unwrap();

        let mut invalid = TopupSetting::new(UserId::generate(), 100, 0, now());
        invalid.payment_method_id = Some("pm_1".into());
        store.save_topup_setting(&invalid, None).unwrap();

        let report = processor.process_all(now()).await.unwrap();
        assert_eq!(report.users, 3);
        assert_eq!(report.topped_up, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn charge_counts_against_cap_even_if_crediting_fails() {
        let (store, gateway, processor) = flaky_setup();
        let user_id = UserId::generate();
        capped_setting(store.as_ref(), user_id);
        store.fail_credits.store(true, Ordering::SeqCst);

        let first = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(
            first,
            TopupOutcome::ChargedNotCredited {
                amount_cents: 1000,
                ..
            }
        ));
        let spend = store.get_topup_setting(&user_id).unwrap().unwrap().value;
        assert_eq!(spend.monthly_spend_cents, 1000);

        let record = &store.list_topup_records(&user_id, 10).unwrap()[0];
        assert_eq!(record.status, TopupStatus::ChargedNotCredited);
        assert_eq!(record.payment_id.as_deref(), Some("pay_1"));
        assert!(record.spend_recorded);

        // Still broke and below threshold, but no second charge.
        let second = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(second, TopupOutcome::Unreconciled { .. }));
        let charges = gateway.charges.lock();
        assert_eq!(charges.len(), 1);
        assert!(charges.iter().map(|c| c.amount_cents).sum::<i64>() <= 1500);
    }

    #[tokio::test]
    async fn uncredited_charge_is_credited_once_store_recovers() {
        let (store, gateway, processor) = flaky_setup();
        let user_id = UserId::generate();
        capped_setting(store.as_ref(), user_id);
        store.fail_credits.store(true, Ordering::SeqCst);
        processor.process_user(&user_id, now()).await.unwrap();

        store.fail_credits.store(false, Ordering::SeqCst);
        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        let record = store.list_topup_records(&user_id, 10).unwrap().remove(0);
        assert_eq!(
            outcome,
            TopupOutcome::Reconciled {
                topup_id: record.id,
                balance: 1000,
            }
        );
        assert_eq!(record.status, TopupStatus::Succeeded);
        assert_eq!(gateway.charges.lock().len(), 1);

        // Booked exactly once.
        let spend = store.get_topup_setting(&user_id).unwrap().unwrap().value;
        assert_eq!(spend.monthly_spend_cents, 1000);
        assert_eq!(store.list_transactions(&user_id, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unrecorded_spend_is_reported_and_blocks_next_charge() {
        let (store, gateway, processor) = flaky_setup();
        let user_id = UserId::generate();
        capped_setting(store.as_ref(), user_id);
        store.conflict_updates.store(true, Ordering::SeqCst);

        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        match outcome {
            TopupOutcome::ToppedUp {
                balance,
                spend_error,
                ..
            } => {
                assert_eq!(balance, 1000);
                assert!(spend_error.unwrap().contains("version conflict"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let record = &store.list_topup_records(&user_id, 10).unwrap()[0];
        assert_eq!(record.status, TopupStatus::Succeeded);
        assert!(!record.spend_recorded);

        // Spend the credits so the balance is low again.
        store
            .apply_transaction(&CreditTransaction::usage(user_id, 1000, "burn".into()))
            .unwrap();
        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(outcome, TopupOutcome::Unreconciled { .. }));
        assert_eq!(gateway.charges.lock().len(), 1);

        store.conflict_updates.store(false, Ordering::SeqCst);
        let outcome = processor.process_user(&user_id, now()).await.unwrap();
        assert!(matches!(outcome, TopupOutcome::Reconciled { balance: 0, .. }));
        let spend = store.get_topup_setting(&user_id).unwrap().unwrap().value;
        assert_eq!(spend.monthly_spend_cents, 1000);
        assert_eq!(gateway.charges.lock().len(), 1);
    }
}
