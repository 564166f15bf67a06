//! Automatic top-up settings and the decision of when to fire one.
//!
//! [`needs_topup`] is pure. Once a charge succeeds the caller records the
//! spend with [`TopupSetting::record_topup`] and then credits the ledger. A
//! [`TopupRecord`] tracks which of those steps have landed, so a half-finished
//! attempt can be completed later instead of charged again.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::ids::{TopupId, UserId};
use crate::pricing::{PriceBook, TierKind};

/// Per-user auto top-up configuration and running monthly spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupSetting {
    /// Owner of the setting.
    pub user_id: UserId,

    /// Whether automatic top-ups are switched on.
    #[serde(default)]
    pub is_enabled: bool,

    /// Fire when the balance is at or below this many credits.
    pub threshold_amount: i64,

    /// Credits bought per top-up.
    pub topup_amount: i64,

    /// Cap on top-up spend per calendar month, in cents. `None` means uncapped.
    #[serde(default)]
    pub max_monthly_spend_cents: Option<i64>,

    /// Spend in the current monthly window, in cents.
    #[serde(default)]
    pub monthly_spend_cents: i64,

    /// When the current monthly window ends.
    pub monthly_spend_reset_at: DateTime<Utc>,

    /// When the last successful top-up happened.
    #[serde(default)]
    pub last_topup_at: Option<DateTime<Utc>>,

    /// Payment method to charge. Without one no top-up ever fires.
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

impl TopupSetting {
    /// Create an enabled setting with an empty monthly window starting at `now`.
    #[must_use]
    pub fn new(user_id: UserId, threshold_amount: i64, topup_amount: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            is_enabled: true,
            threshold_amount,
            topup_amount,
            max_monthly_spend_cents: None,
            monthly_spend_cents: 0,
            monthly_spend_reset_at: start_of_next_month(now),
            last_topup_at: None,
            payment_method_id: None,
        }
    }

    /// Whether a usable payment method is on file.
    #[must_use]
    pub fn has_payment_method(&self) -> bool {
        self.payment_method_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Check the setting's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a negative threshold, a non-positive
    /// top-up amount, or a negative spend cap or monthly spend.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threshold_amount < 0 {
            return Err(ValidationError::out_of_range(
                "threshold_amount",
                self.threshold_amount,
                "must be >= 0",
            ));
        }
        if self.topup_amount <= 0 {
            return Err(ValidationError::out_of_range(
                "topup_amount",
                self.topup_amount,
                "must be > 0",
            ));
        }
        if let Some(cap) = self.max_monthly_spend_cents {
            if cap < 0 {
                return Err(ValidationError::out_of_range(
                    "max_monthly_spend_cents",
                    cap,
                    "must be >= 0",
                ));
            }
        }
        if self.monthly_spend_cents < 0 {
            return Err(ValidationError::out_of_range(
                "monthly_spend_cents",
                self.monthly_spend_cents,
                "must be >= 0",
            ));
        }
        Ok(())
    }

    /// Start a new monthly window if the current one has ended.
    ///
    /// Returns `true` when the spend counter was reset.
    pub fn roll_monthly_window(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.monthly_spend_reset_at {
            return false;
        }
        self.monthly_spend_cents = 0;
        self.monthly_spend_reset_at = start_of_next_month(now);
        true
    }

    /// Account for a successful top-up charge.
    pub fn record_topup(&mut self, amount_cents: i64, now: DateTime<Utc>) {
        self.monthly_spend_cents = self.monthly_spend_cents.saturating_add(amount_cents);
        self.last_topup_at = Some(now);
    }
}

/// First instant (UTC) of the calendar month after `now`.
fn start_of_next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(now, |midnight| midnight.and_utc())
}

/// Why a top-up was not needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopupSkipReason {
    /// Auto top-up is switched off.
    Disabled,
    /// No payment method on file.
    NoPaymentMethod,
    /// Balance is above the threshold.
    AboveThreshold,
    /// The top-up would push monthly spend over the cap.
    SpendCapExceeded {
        /// Monthly spend including this top-up, in cents.
        projected_cents: i64,
        /// Configured cap, in cents.
        cap_cents: i64,
    },
}

impl fmt::Display for TopupSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("auto top-up disabled"),
            Self::NoPaymentMethod => f.write_str("no payment method configured"),
            Self::AboveThreshold => f.write_str("balance above threshold"),
            Self::SpendCapExceeded {
                projected_cents,
                cap_cents,
            } => write!(
                f,
                "monthly spend cap exceeded ({projected_cents} > {cap_cents} cents)"
            ),
        }
    }
}

/// Outcome of [`needs_topup`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupDecision {
    /// Whether a top-up should fire now.
    pub needed: bool,
    /// Set whenever `needed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<TopupSkipReason>,
}

impl TopupDecision {
    const fn proceed() -> Self {
        Self {
            needed: true,
            reason: None,
        }
    }

    const fn skip(reason: TopupSkipReason) -> Self {
        Self {
            needed: false,
            reason: Some(reason),
        }
    }
}

/// Decide whether `setting` calls for a top-up at `balance`.
///
/// The top-up is priced as a credit purchase of `setting.topup_amount` through
/// `book`, so tier discounts count against the monthly cap.
#[must_use]
pub fn needs_topup(balance: i64, setting: &TopupSetting, book: &PriceBook) -> TopupDecision {
    if !setting.is_enabled {
        return TopupDecision::skip(TopupSkipReason::Disabled);
    }
    if !setting.has_payment_method() {
        return TopupDecision::skip(TopupSkipReason::NoPaymentMethod);
    }
    if balance > setting.threshold_amount {
        return TopupDecision::skip(TopupSkipReason::AboveThreshold);
    }

    if let Some(cap_cents) = setting.max_monthly_spend_cents {
        let price_cents = book
            .quote(TierKind::Credit, setting.topup_amount)
            .discounted_cents();
        let projected_cents = setting.monthly_spend_cents.saturating_add(price_cents);
        if projected_cents > cap_cents {
            return TopupDecision::skip(TopupSkipReason::SpendCapExceeded {
                projected_cents,
                cap_cents,
            });
        }
    }

    TopupDecision::proceed()
}

/// Lifecycle of a top-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopupStatus {
    /// Charge requested, not yet settled.
    Pending,
    /// Charged, but the credits have not reached the ledger yet.
    ChargedNotCredited,
    /// Charged and credited.
    Succeeded,
    /// Charge failed; the next poll may try again.
    Failed,
}

/// History entry for a single top-up attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupRecord {
    /// Attempt identifier, doubling as the payment idempotency key.
    pub id: TopupId,
    /// User being topped up.
    pub user_id: UserId,
    /// Credits bought.
    pub credits: i64,
    /// Amount charged, in cents.
    pub amount_cents: i64,
    /// Current status.
    pub status: TopupStatus,
    /// Payment reference once charged.
    pub payment_id: Option<String>,
    /// Last failure detail.
    pub error_message: Option<String>,
    /// Whether the charge has been added to the monthly spend.
    #[serde(default = "spend_recorded_default")]
    pub spend_recorded: bool,
    /// When the attempt started.
    pub created_at: DateTime<Utc>,
    /// When the attempt settled.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TopupRecord {
    /// Start a new pending attempt.
    #[must_use]
    pub fn pending(user_id: UserId, credits: i64, amount_cents: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: TopupId::generate(),
            user_id,
            credits,
            amount_cents,
            status: TopupStatus::Pending,
            payment_id: None,
            error_message: None,
            spend_recorded: false,
            created_at: now,
            completed_at: None,
        }
    }

    /// Mark the attempt as charged; crediting is still outstanding.
    pub fn charged(&mut self, payment_id: impl Into<String>) {
        self.status = TopupStatus::ChargedNotCredited;
        self.payment_id = Some(payment_id.into());
    }

    /// Note that the charge now counts against the monthly spend.
    pub fn mark_spend_recorded(&mut self) {
        self.spend_recorded = true;
    }

    /// Keep the attempt charged-but-not-credited with `message` as the reason.
    pub fn credit_failed(&mut self, message: impl Into<String>) {
        self.status = TopupStatus::ChargedNotCredited;
        self.error_message = Some(message.into());
    }

    /// Mark the attempt as charged and credited.
    pub fn succeed(&mut self, payment_id: impl Into<String>, now: DateTime<Utc>) {
        self.status = TopupStatus::Succeeded;
        self.payment_id = Some(payment_id.into());
        self.error_message = None;
        self.completed_at = Some(now);
    }

    /// Whether money was taken but the spend or the credits are not yet booked.
    ///
    /// No further charge may be made for the user while this holds.
    #[must_use]
    pub fn needs_reconciliation(&self) -> bool {
        match self.status {
            TopupStatus::ChargedNotCredited => true,
            TopupStatus::Succeeded => !self.spend_recorded,
            TopupStatus::Pending | TopupStatus::Failed => false,
        }
    }

    /// Mark the attempt as failed.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = TopupStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
    }
}

// Records written before spend tracking existed were booked in one step.
const fn spend_recorded_default() -> bool {
    true
}
