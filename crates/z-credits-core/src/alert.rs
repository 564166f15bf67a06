//! Low-balance alert settings and the cooldown-aware trigger decision.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ValidationError;
use crate::ids::{AlertEventId, UserId};

/// Minimum time between two triggers of the same user's alert.
pub const ALERT_COOLDOWN: Duration = Duration::hours(24);

/// Delivery channel for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    /// Email to the account owner.
    Email,
    /// SMS to the account owner.
    Sms,
    /// Outbound webhook.
    Webhook,
    /// Dashboard notification.
    InApp,
}

impl AlertChannel {
    /// Stable lowercase name, as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Webhook => "webhook",
            Self::InApp => "in_app",
        }
    }
}

/// Per-user low-balance alert configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSetting {
    /// Owner of the setting.
    pub user_id: UserId,

    /// Whether the alert is armed.
    #[serde(default)]
    pub is_enabled: bool,

    /// Alert when the balance is at or below this many credits.
    pub threshold_amount: i64,

    /// Channels to deliver on.
    #[serde(default)]
    pub alert_types: Vec<AlertChannel>,

    /// When the alert last went out.
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertSetting {
    /// Create an enabled alert that has never fired.
    #[must_use]
    pub fn new(user_id: UserId, threshold_amount: i64, alert_types: Vec<AlertChannel>) -> Self {
        Self {
            user_id,
            is_enabled: true,
            threshold_amount,
            alert_types,
            last_triggered_at: None,
        }
    }

    /// Check the setting's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a negative threshold, no channels or a
    /// repeated channel.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threshold_amount < 0 {
            return Err(ValidationError::out_of_range(
                "threshold_amount",
                self.threshold_amount,
                "must be >= 0",
            ));
        }
        if self.alert_types.is_empty() {
            return Err(ValidationError::Empty {
                field: "alert_types",
            });
        }
        let unique: HashSet<_> = self.alert_types.iter().collect();
        if unique.len() != self.alert_types.len() {
            return Err(ValidationError::Duplicate {
                field: "alert_types",
            });
        }
        Ok(())
    }

    /// Time left until the alert may fire again, or `None` if it is not cooling down.
    ///
    /// A trigger stamped after `now` counts as cooling down for the full period.
    #[must_use]
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_triggered_at?;
        let elapsed = now.signed_duration_since(last);
        if elapsed < Duration::zero() {
            return Some(ALERT_COOLDOWN);
        }
        (elapsed < ALERT_COOLDOWN).then(|| ALERT_COOLDOWN - elapsed)
    }

    /// Stamp a successful dispatch.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        self.last_triggered_at = Some(now);
    }
}

/// Decide whether the alert should fire for `balance` at `now`.
#[must_use]
pub fn needs_alert(balance: i64, setting: &AlertSetting, now: DateTime<Utc>) -> bool {
    setting.is_enabled
        && balance <= setting.threshold_amount
        && setting.cooldown_remaining(now).is_none()
}

/// Message body sent on every channel.
#[must_use]
pub fn low_balance_message(balance: i64, threshold: i64) -> String {
    format!(
        "Your credit balance is {balance} credits, at or below your alert threshold of {threshold} credits."
    )
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The channel accepted the message.
    Delivered,
    /// The channel rejected the message or was unreachable.
    Failed,
}

/// History entry for one alert delivery on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Delivery identifier.
    pub id: AlertEventId,
    /// Alerted user.
    pub user_id: UserId,
    /// Channel used.
    pub channel: AlertChannel,
    /// Balance at the time of the alert.
    pub balance: i64,
    /// Delivery result.
    pub status: DeliveryStatus,
    /// Failure detail when `status` is `Failed`.
    pub error_message: Option<String>,
    /// When the delivery was attempted.
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Record a successful delivery.
    #[must_use]
    pub fn delivered(
        user_id: UserId,
        channel: AlertChannel,
        balance: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertEventId::generate(),
            user_id,
            channel,
            balance,
            status: DeliveryStatus::Delivered,
            error_message: None,
            created_at: now,
        }
    }

    /// Record a failed delivery.
    #[must_use]
    pub fn failed(
        user_id: UserId,
        channel: AlertChannel,
        balance: i64,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertEventId::generate(),
            user_id,
            channel,
            balance,
            status: DeliveryStatus::Failed,
            error_message: Some(error.into()),
            created_at: now,
        }
    }
}
