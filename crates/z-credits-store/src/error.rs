//! Error types for z-credits storage.

use z_credits_core::{CreditError, ValidationError};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A versioned write raced with another writer.
    #[error("{entity} {id} version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// Kind of record.
        entity: &'static str,
        /// Record key.
        id: String,
        /// Version the caller based its update on (`None` = create).
        expected: Option<u64>,
        /// Version currently stored (`None` = absent).
        actual: Option<u64>,
    },

    /// Debit would take the balance below zero.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// The write was rejected by validation.
    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),
}

impl From<StoreError> for CreditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            StoreError::Invalid(err) => Self::Validation(err),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Compute the next version for a compare-and-swap write.
///
/// `expected = None` means the record must not exist yet.
pub(crate) fn next_version(
    entity: &'static str,
    id: impl ToString,
    actual: Option<u64>,
    expected: Option<u64>,
) -> Result<u64> {
    match (actual, expected) {
        (None, None) => Ok(1),
        (Some(actual), Some(expected)) if actual == expected => Ok(actual + 1),
        (actual, expected) => Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        }),
    }
}

/// Balance after applying `amount`, refusing to go negative on a debit.
pub(crate) fn checked_balance(current: i64, amount: i64) -> Result<i64> {
    let next = current.saturating_add(amount);
    if amount < 0 && next < 0 {
        return Err(StoreError::InsufficientCredits {
            balance: current,
            required: amount.saturating_neg(),
        });
    }
    Ok(next)
}
