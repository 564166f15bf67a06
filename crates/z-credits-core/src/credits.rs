//! Credit ledger types for z-credits.
//!
//! Every balance change is a [`CreditTransaction`]. A user's balance is the
//! `balance_after` of their newest transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::{TopupId, TransactionId, UserId};

/// A ledger entry representing a balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Credits moved. Positive = credit, negative = debit.
    pub amount: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Balance after this transaction. Filled in by the store when applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional context (payment id, counterparty, top-up id).
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    fn build(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        description: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            transaction_type,
            balance_after: 0,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Credits bought directly.
    #[must_use]
    pub fn purchase(user_id: UserId, amount: i64, description: String) -> Self {
        Self::build(
            user_id,
            amount.abs(),
            TransactionType::Purchase,
            description,
            serde_json::Value::Null,
        )
    }

    /// Credits bought by an automatic top-up.
    #[must_use]
    pub fn auto_topup(user_id: UserId, amount: i64, topup_id: TopupId, payment_id: &str) -> Self {
        Self::build(
            user_id,
            amount.abs(),
            TransactionType::AutoTopup,
            format!("Auto top-up of {amount} credits"),
            serde_json::json!({ "topup_id": topup_id.to_string(), "payment_id": payment_id }),
        )
    }

    /// Credits consumed.
    #[must_use]
    pub fn usage(user_id: UserId, amount: i64, description: String) -> Self {
        Self::build(
            user_id,
            -amount.abs(),
            TransactionType::Usage,
            description,
            serde_json::Value::Null,
        )
    }

    /// Credits returned to the user.
    #[must_use]
    pub fn refund(user_id: UserId, amount: i64, reason: String) -> Self {
        Self::build(
            user_id,
            amount.abs(),
            TransactionType::Refund,
            reason,
            serde_json::Value::Null,
        )
    }

    /// Promotional or operator-granted credits.
    #[must_use]
    pub fn bonus(user_id: UserId, amount: i64, reason: String) -> Self {
        Self::build(
            user_id,
            amount.abs(),
            TransactionType::Bonus,
            reason,
            serde_json::Value::Null,
        )
    }

    /// The two legs of a transfer: debit on the sender, credit on the recipient.
    #[must_use]
    pub fn transfer_legs(transfer: &CreditTransfer) -> (Self, Self) {
        let note = transfer.note.clone().unwrap_or_default();
        let out = Self::build(
            transfer.from,
            -transfer.amount.abs(),
            TransactionType::TransferOut,
            format!("Transfer of {} credits to {}", transfer.amount, transfer.to),
            serde_json::json!({ "counterparty": transfer.to.to_string(), "note": note }),
        );
        let incoming = Self::build(
            transfer.to,
            transfer.amount.abs(),
            TransactionType::TransferIn,
            format!("Transfer of {} credits from {}", transfer.amount, transfer.from),
            serde_json::json!({ "counterparty": transfer.from.to_string(), "note": note }),
        );
        (out, incoming)
    }
}

/// Type of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// User purchased credits.
    Purchase,

    /// Automatic top-up purchase.
    AutoTopup,

    /// Received from another user.
    TransferIn,

    /// Sent to another user.
    TransferOut,

    /// Credits consumed.
    Usage,

    /// Refund issued.
    Refund,

    /// Promotional/bonus credits.
    Bonus,
}

impl TransactionType {
    /// Check if this transaction type adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Purchase | Self::AutoTopup | Self::TransferIn | Self::Refund | Self::Bonus
        )
    }

    /// Check if this transaction type removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Usage | Self::TransferOut)
    }
}

/// A request to move credits between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransfer {
    /// Sender.
    pub from: UserId,
    /// Recipient.
    pub to: UserId,
    /// Credits to move.
    pub amount: i64,
    /// Optional free-text note.
    #[serde(default)]
    pub note: Option<String>,
}

impl CreditTransfer {
    /// Check the transfer's invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a non-positive amount or a self-transfer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::out_of_range(
                "amount",
                self.amount,
                "must be > 0",
            ));
        }
        if self.from == self.to {
            return Err(ValidationError::SelfTransfer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_always_negative() {
        let tx = CreditTransaction::usage(UserId::generate(), 100, "api calls".into());
        assert_eq!(tx.amount, -100);
        let tx = CreditTransaction::usage(UserId::generate(), -100, "api calls".into());
        assert_eq!(tx.amount, -100);
    }

    #[test]
    fn auto_topup_carries_payment_reference() {
        let topup_id = TopupId::generate();
        let tx = CreditTransaction::auto_topup(UserId::generate(), 2000, topup_id, "pay_1");
        assert_eq!(tx.amount, 2000);
        assert_eq!(tx.transaction_type, TransactionType::AutoTopup);
        assert_eq!(tx.metadata["payment_id"], "pay_1");
        assert_eq!(tx.metadata["topup_id"], topup_id.to_string());
    }

    #[test]
    fn transfer_legs_mirror_each_other() {
        let transfer = CreditTransfer {
            from: UserId::generate(),
            to: UserId::generate(),
            amount: 250,
            note: Some("team budget".into()),
        };
        let (out, incoming) = CreditTransaction::transfer_legs(&transfer);

        assert_eq!(out.user_id, transfer.from);
        assert_eq!(out.amount, -250);
        assert_eq!(out.transaction_type, TransactionType::TransferOut);
        assert_eq!(incoming.user_id, transfer.to);
        assert_eq!(incoming.amount, 250);
        assert_eq!(incoming.metadata["note"], "team budget");
    }

    #[test]
    fn transfer_validation() {
        let user = UserId::generate();
        let mut transfer = CreditTransfer {
            from: user,
            to: UserId::generate(),
            amount: 0,
            note: None,
        };
        assert!(transfer.validate().is_err());

        transfer.amount = 10;
        assert!(transfer.validate().is_ok());

        transfer.to = user;
        assert_eq!(transfer.validate(), Err(ValidationError::SelfTransfer));
    }

    #[test]
    fn credit_and_debit_types_are_disjoint() {
        let all = [
            TransactionType::Purchase,
            TransactionType::AutoTopup,
            TransactionType::TransferIn,
            TransactionType::TransferOut,
            TransactionType::Usage,
            TransactionType::Refund,
            TransactionType::Bonus,
        ];
        for ty in all {
            assert_ne!(ty.is_credit(), ty.is_debit(), "{ty:?}");
        }
    }
}
