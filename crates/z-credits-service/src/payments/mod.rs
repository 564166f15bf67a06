//! Payment collaborator used by auto top-up.
//!
//! The processor only sees the [`PaymentGateway`] trait. [`HttpPaymentGateway`]
//! talks to a payments API over JSON; tests inject their own implementations.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use z_credits_core::UserId;

pub use client::HttpPaymentGateway;

/// A request to charge a user's stored payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    /// User being charged.
    pub user_id: UserId,
    /// Payment method on file.
    pub payment_method_id: String,
    /// Amount in cents.
    pub amount_cents: i64,
    /// Key that makes retries of the same attempt safe.
    pub idempotency_key: String,
}

/// A successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentReceipt {
    /// Provider reference for the charge.
    pub payment_id: String,
}

/// Error type for payment operations.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider refused the charge.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The provider returned an error status.
    #[error("payments API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Charges a user's payment method.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge `request.amount_cents` to the user's payment method.
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError>;
}
