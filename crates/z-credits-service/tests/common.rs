//! Common test utilities for z-credits integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use parking_lot::Mutex;
use serde_json::json;

use z_credits_core::{AlertChannel, UserId};
use z_credits_service::{
    create_router, AppState, ChargeRequest, Notifier, NotifyError, PaymentError, PaymentGateway,
    PaymentReceipt, ServiceConfig, StorageBackend,
};
use z_credits_store::MemoryStore;

/// Payment gateway that records charges and approves or declines them all.
#[derive(Default)]
pub struct RecordingGateway {
    pub decline: bool,
    pub charges: Mutex<Vec<ChargeRequest>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<PaymentReceipt, PaymentError> {
        let mut charges = self.charges.lock();
        charges.push(request.clone());
        if self.decline {
            return Err(PaymentError::Declined("card_declined".into()));
        }
        Ok(PaymentReceipt {
            payment_id: format!("pay_{}", charges.len()),
        })
    }
}

/// Notifier that records every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(UserId, AlertChannel, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user_id: &UserId,
        channel: AlertChannel,
        message: &str,
    ) -> Result<(), NotifyError> {
        self.sent.lock().push((*user_id, channel, message.to_string()));
        Ok(())
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Shared store behind the server.
    pub store: Arc<MemoryStore>,
    /// Charges made by auto top-up.
    pub gateway: Arc<RecordingGateway>,
    /// Alerts delivered.
    pub notifier: Arc<RecordingNotifier>,
    /// A test user ID.
    pub test_user_id: UserId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The admin API key.
    pub admin_api_key: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and approving gateway.
    pub fn new() -> Self {
        Self::with_gateway(Some(RecordingGateway::default()))
    }

    /// Create a harness with a custom gateway, or none to disable top-ups.
    pub fn with_gateway(gateway: Option<RecordingGateway>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway.map(Arc::new);
        let notifier = Arc::new(RecordingNotifier::default());

        let service_api_key = "test-service-key".to_string();
        let admin_api_key = "test-admin-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            storage_backend: StorageBackend::Memory,
            service_api_key: Some(service_api_key.clone()),
            admin_api_key: Some(admin_api_key.clone()),
            ..ServiceConfig::default()
        };

        let state = AppState::with_collaborators(
            store.clone(),
            config,
            gateway
                .clone()
                .map(|g| g as Arc<dyn PaymentGateway>),
            notifier.clone(),
        );
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            gateway: gateway.unwrap_or_default(),
            notifier,
            test_user_id: UserId::generate(),
            service_api_key,
            admin_api_key,
        }
    }

    /// Path under the test user.
    pub fn user_path(&self, suffix: &str) -> String {
        format!("/v1/users/{}{}", self.test_user_id, suffix)
    }

    /// Grant `amount` bonus credits to `user_id` through the admin API.
    pub async fn fund(&self, user_id: UserId, amount: i64) {
        self.server
            .post(&format!("/v1/users/{user_id}/credits"))
            .add_header("x-admin-key", &self.admin_api_key)
            .json(&json!({ "amount": amount, "kind": "bonus", "reason": "Test funding" }))
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
