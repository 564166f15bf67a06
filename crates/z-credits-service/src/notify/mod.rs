//! Notification collaborator used by low-balance alerts.

pub mod webhook;

use async_trait::async_trait;

use z_credits_core::{AlertChannel, UserId};

pub use webhook::WebhookNotifier;

/// Error type for notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiver answered with a non-success status.
    #[error("webhook rejected delivery: {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Delivers a message to a user on one channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `message` to `user_id` over `channel`.
    async fn notify(
        &self,
        user_id: &UserId,
        channel: AlertChannel,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes the alert to the log.
///
/// Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        channel: AlertChannel,
        message: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %user_id,
            channel = channel.as_str(),
            message = %message,
            "Low balance alert"
        );
        Ok(())
    }
}
