//! Signed JSON webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;

use z_credits_core::{AlertChannel, UserId};

use super::{Notifier, NotifyError};
use crate::crypto::{sign_payload, SIGNATURE_HEADER};

/// Delivery body posted to the webhook.
#[derive(Debug, Serialize)]
struct Delivery<'a> {
    user_id: String,
    channel: AlertChannel,
    message: &'a str,
    sent_at: DateTime<Utc>,
}

/// Posts every alert to a single webhook, which fans out to the real channel.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    /// Create a notifier for `url`, signing deliveries when `secret` is set.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::Configuration` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        channel: AlertChannel,
        message: &str,
    ) -> Result<(), NotifyError> {
        let sent_at = Utc::now();
        let delivery = Delivery {
            user_id: user_id.to_string(),
            channel,
            message,
            sent_at,
        };
        // Sign the exact bytes we send.
        let body = serde_json::to_string(&delivery)
            .map_err(|e| NotifyError::Configuration(e.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(
                SIGNATURE_HEADER,
                sign_payload(secret, sent_at.timestamp(), &body),
            );
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                user_id = %user_id,
                channel = channel.as_str(),
                status = %status,
                "Notification webhook rejected delivery"
            );
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(user_id = %user_id, channel = channel.as_str(), "Alert delivered");
        Ok(())
    }
}
