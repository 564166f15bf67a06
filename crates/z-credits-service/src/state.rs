//! Application state.

use std::sync::Arc;

use z_credits_store::Store;

use crate::config::ServiceConfig;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::payments::{HttpPaymentGateway, PaymentGateway};
use crate::processor::{AlertProcessor, TopupProcessor};
use crate::scheduler::PollMonitor;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Auto top-up processor (absent when payments are not configured).
    pub topups: Option<Arc<TopupProcessor>>,

    /// Low-balance alert processor.
    pub alerts: Arc<AlertProcessor>,

    /// Background poll loops, for health reporting.
    pub pollers: Vec<PollMonitor>,
}

impl AppState {
    /// Create application state, building collaborators from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let payments = config
            .payments_api_url
            .as_ref()
            .zip(config.payments_api_key.as_ref())
            .and_then(|(url, key)| match HttpPaymentGateway::new(url, key) {
                Ok(client) => {
                    tracing::info!(payments_url = %url, "Payments integration enabled");
                    Some(Arc::new(client) as Arc<dyn PaymentGateway>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create payments client");
                    None
                }
            });

        if payments.is_none() {
            tracing::warn!("Payments not configured - auto top-up is disabled");
        }

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => match WebhookNotifier::new(url, config.notify_webhook_secret.clone()) {
                Ok(notifier) => {
                    tracing::info!(
                        webhook_url = %url,
                        signed = config.notify_webhook_secret.is_some(),
                        "Alert webhook enabled"
                    );
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create alert webhook, logging alerts instead");
                    Arc::new(LogNotifier)
                }
            },
            None => {
                tracing::warn!("Alert webhook not configured - alerts will only be logged");
                Arc::new(LogNotifier)
            }
        };

        Self::with_collaborators(store, config, payments, notifier)
    }

    /// Create application state with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        payments: Option<Arc<dyn PaymentGateway>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let topups = payments.map(|payments| {
            Arc::new(TopupProcessor::new(
                Arc::clone(&store),
                payments,
                config.unit_price_usd,
                config.processor_concurrency,
            ))
        });
        let alerts = Arc::new(AlertProcessor::new(
            Arc::clone(&store),
            notifier,
            config.processor_concurrency,
        ));

        Self {
            store,
            config,
            topups,
            alerts,
            pollers: Vec::new(),
        }
    }

    /// Attach poll loop monitors.
    #[must_use]
    pub fn with_pollers(mut self, pollers: Vec<PollMonitor>) -> Self {
        self.pollers = pollers;
        self
    }

    /// Check if auto top-up is available.
    #[must_use]
    pub fn has_payments(&self) -> bool {
        self.topups.is_some()
    }
}
