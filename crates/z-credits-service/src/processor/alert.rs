//! Low-balance alert processor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use z_credits_core::{low_balance_message, needs_alert, AlertChannel, AlertRecord, UserId};
use z_credits_store::{Store, StoreError};

use super::{UserLocks, CAS_ATTEMPTS};
use crate::notify::Notifier;

/// What happened to one user in an alert cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// The user has no alert setting.
    NoSetting,
    /// The stored setting failed validation and was ignored.
    InvalidSetting {
        /// Validation message.
        error: String,
    },
    /// Another alert evaluation for this user is still running.
    InFlight,
    /// Disabled, above threshold, or cooling down.
    NotNeeded,
    /// At least one channel delivered; the cooldown started.
    Sent {
        /// Channels that accepted the message.
        delivered: Vec<AlertChannel>,
        /// Channels that failed.
        failed: Vec<AlertChannel>,
    },
    /// Every channel failed; the next cycle will try again.
    Failed {
        /// Failure detail.
        error: String,
    },
}

/// One user's result within a cycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAlertOutcome {
    /// User evaluated.
    pub user_id: UserId,
    /// What happened.
    #[serde(flatten)]
    pub outcome: AlertOutcome,
}

/// Summary of one alert cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertCycleReport {
    /// Users evaluated.
    pub users: usize,
    /// Users alerted on at least one channel.
    pub sent: usize,
    /// Users with nothing to do.
    pub skipped: usize,
    /// Users whose every channel failed.
    pub failed: usize,
    /// Users skipped because a previous evaluation was still running.
    pub in_flight: usize,
    /// Per-user detail.
    pub outcomes: Vec<UserAlertOutcome>,
}

impl AlertCycleReport {
    fn from_outcomes(outcomes: Vec<UserAlertOutcome>) -> Self {
        let mut report = Self {
            users: outcomes.len(),
            ..Self::default()
        };
        for entry in &outcomes {
            match entry.outcome {
                AlertOutcome::Sent { .. } => report.sent += 1,
                AlertOutcome::Failed { .. } => report.failed += 1,
                AlertOutcome::InFlight => report.in_flight += 1,
                AlertOutcome::NoSetting
                | AlertOutcome::InvalidSetting { .. }
                | AlertOutcome::NotNeeded => report.skipped += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }
}

/// Evaluates alert settings and notifies users at or below threshold.
pub struct AlertProcessor {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    locks: UserLocks,
    max_concurrency: usize,
}

impl AlertProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, max_concurrency: usize) -> Self {
        Self {
            store,
            notifier,
            locks: UserLocks::new(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run one cycle over every enabled setting.
    ///
    /// # Errors
    ///
    /// Returns an error only if the settings cannot be listed.
    pub async fn process_all(&self, now: DateTime<Utc>) -> Result<AlertCycleReport, StoreError> {
        let users: Vec<UserId> = self
            .store
            .list_alert_settings()?
            .into_iter()
            .filter(|record| record.value.is_enabled)
            .map(|record| record.value.user_id)
            .collect();

        let outcomes: Vec<UserAlertOutcome> = stream::iter(users)
            .map(|user_id| async move {
                let outcome = self
                    .process_user(&user_id, now)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::error!(user_id = %user_id, error = %e, "Alert processing failed");
                        AlertOutcome::Failed {
                            error: e.to_string(),
                        }
                    });
                UserAlertOutcome { user_id, outcome }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let report = AlertCycleReport::from_outcomes(outcomes);
        tracing::info!(
            users = report.users,
            sent = report.sent,
            failed = report.failed,
            "Alert cycle complete"
        );
        Ok(report)
    }

    /// Evaluate one user and dispatch on every configured channel if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn process_user(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<AlertOutcome, StoreError> {
        let Some(_guard) = self.locks.try_acquire(user_id) else {
            return Ok(AlertOutcome::InFlight);
        };

        let Some(current) = self.store.get_alert_setting(user_id)? else {
            return Ok(AlertOutcome::NoSetting);
        };
        let setting = current.value;
        if let Err(e) = setting.validate() {
            tracing::warn!(user_id = %user_id, error = %e, "Ignoring invalid alert setting");
            return Ok(AlertOutcome::InvalidSetting {
                error: e.to_string(),
            });
        }

        let balance = self.store.get_balance(user_id)?;
        if !needs_alert(balance, &setting, now) {
            return Ok(AlertOutcome::NotNeeded);
        }

        let message = low_balance_message(balance, setting.threshold_amount);
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;

        for &channel in &setting.alert_types {
            let record = match self.notifier.notify(user_id, channel, &message).await {
                Ok(()) => {
                    delivered.push(channel);
                    AlertRecord::delivered(*user_id, channel, balance, now)
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        channel = channel.as_str(),
                        error = %e,
                        "Alert delivery failed"
                    );
                    failed.push(channel);
                    let error = e.to_string();
                    last_error = Some(error.clone());
                    AlertRecord::failed(*user_id, channel, balance, error, now)
                }
            };
            self.store.put_alert_record(&record)?;
        }

        if delivered.is_empty() {
            return Ok(AlertOutcome::Failed {
                error: last_error.unwrap_or_else(|| "no channel delivered".into()),
            });
        }

        self.mark_triggered(user_id, now)?;
        tracing::info!(
            user_id = %user_id,
            balance,
            threshold = setting.threshold_amount,
            delivered = delivered.len(),
            "Low balance alert sent"
        );

        Ok(AlertOutcome::Sent { delivered, failed })
    }

    /// Start the cooldown, retrying on version conflicts.
    fn mark_triggered(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut last_err = None;
        for _ in 0..CAS_ATTEMPTS {
            let Some(current) = self.store.get_alert_setting(user_id)? else {
                return Ok(());
            };
            let mut setting = current.value;
            setting.mark_triggered(now);

            match self.store.save_alert_setting(&setting, Some(current.version)) {
                Ok(_) => return Ok(()),
                Err(e @ StoreError::VersionConflict { .. }) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Database("cooldown update not attempted".into())))
    }
}
