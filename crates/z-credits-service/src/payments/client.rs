//! Payments API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ChargeRequest, PaymentError, PaymentGateway, PaymentReceipt};

/// Wire body for `POST /v1/charges`.
#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    user_id: String,
    payment_method_id: &'a str,
    amount_cents: i64,
    currency: &'static str,
    idempotency_key: &'a str,
}

/// Error body returned by the payments API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error.or(self.message)
    }
}

/// HTTP payments API client.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Create a new payments client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Configuration` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PaymentError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError> {
        let url = format!("{}/v1/charges", self.base_url);
        let body = ChargeBody {
            user_id: request.user_id.to_string(),
            payment_method_id: &request.payment_method_id,
            amount_cents: request.amount_cents,
            currency: "usd",
            idempotency_key: &request.idempotency_key,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<PaymentReceipt>().await?);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| status.to_string());

        tracing::warn!(
            user_id = %request.user_id,
            status = %status,
            error = %message,
            "Payments API rejected charge"
        );

        if status == StatusCode::PAYMENT_REQUIRED {
            Err(PaymentError::Declined(message))
        } else {
            Err(PaymentError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}
