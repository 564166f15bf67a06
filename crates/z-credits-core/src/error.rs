//! Error types for z-credits.

use crate::ids::IdError;

/// Result type for z-credits operations.
pub type Result<T> = std::result::Result<T, CreditError>;

/// A configuration value that failed validation.
///
/// Validation runs synchronously before any decision logic, so these errors
/// always describe caller input rather than runtime state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A numeric field is outside its allowed range.
    #[error("{field} out of range ({value}): {reason}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// What the field must satisfy.
        reason: &'static str,
    },

    /// A lower bound is greater than its upper bound.
    #[error("invalid range: {field} min={min} > max={max}")]
    InvalidRange {
        /// Name of the range.
        field: &'static str,
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },

    /// A collection that must not be empty was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A collection contains the same entry twice.
    #[error("{field} contains duplicates")]
    Duplicate {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A transfer names the same user on both sides.
    #[error("cannot transfer credits to the same user")]
    SelfTransfer,
}

impl ValidationError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl std::fmt::Display,
        reason: &'static str,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            reason,
        }
    }
}

/// Errors that can occur in z-credits operations.
#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Insufficient credits for the operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// External service error (payments, notifications).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },
}
