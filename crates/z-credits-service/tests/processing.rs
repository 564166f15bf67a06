//! End-to-end processor runs through the admin API.

mod common;

use axum::http::StatusCode;
use common::{RecordingGateway, TestHarness};
use serde_json::json;

use z_credits_core::AlertChannel;

async fn configure_topup(harness: &TestHarness, threshold: i64, amount: i64) {
    harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "threshold_amount": threshold,
            "topup_amount": amount,
            "payment_method_id": "pm_test"
        }))
        .await
        .assert_status_ok();
}

async fn run(harness: &TestHarness, what: &str) -> serde_json::Value {
    let response = harness
        .server
        .post(&format!("/v1/admin/run/{what}"))
        .add_header("x-admin-key", &harness.admin_api_key)
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn topup_cycle_charges_and_credits() {
    let harness = TestHarness::new();
    configure_topup(&harness, 100, 1000).await;
    harness.fund(harness.test_user_id, 50).await;

    let report = run(&harness, "topups").await;
    assert_eq!(report["users"], 1);
    assert_eq!(report["topped_up"], 1);
    assert_eq!(report["outcomes"][0]["outcome"], "topped_up");
    assert_eq!(report["outcomes"][0]["balance"], 1050);

    assert_eq!(harness.gateway.charges.lock()[0].amount_cents, 1000);

    let history: serde_json::Value = harness
        .server
        .get(&harness.user_path("/topup/history"))
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .json();
    assert_eq!(history[0]["status"], "succeeded");
    assert_eq!(history[0]["payment_id"], "pay_1");

    // Balance is now above threshold; nothing more happens.
    let report = run(&harness, "topups").await;
    assert_eq!(report["topped_up"], 0);
    assert_eq!(report["skipped"], 1);
    assert_eq!(harness.gateway.charges.lock().len(), 1);
}

#[tokio::test]
async fn declined_topup_is_recorded() {
    let harness = TestHarness::with_gateway(Some(RecordingGateway {
        decline: true,
        ..RecordingGateway::default()
    }));
    configure_topup(&harness, 100, 1000).await;

    let report = run(&harness, "topups").await;
    assert_eq!(report["failed"], 1);

    let history: serde_json::Value = harness
        .server
        .get(&harness.user_path("/topup/history"))
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .json();
    assert_eq!(history[0]["status"], "failed");
    assert!(history[0]["error_message"]
        .as_str()
        .unwrap()
        .contains("card_declined"));
}

#[tokio::test]
async fn topups_unavailable_without_payments() {
    let harness = TestHarness::with_gateway(None);

    harness
        .server
        .post("/v1/admin/run/topups")
        .add_header("x-admin-key", &harness.admin_api_key)
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn alert_cycle_respects_cooldown() {
    let harness = TestHarness::new();
    harness
        .server
        .put(&harness.user_path("/alerts"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({ "threshold_amount": 100, "alert_types": ["email"] }))
        .await
        .assert_status_ok();

    let report = run(&harness, "alerts").await;
    assert_eq!(report["sent"], 1);

    let report = run(&harness, "alerts").await;
    assert_eq!(report["sent"], 0);
    assert_eq!(report["skipped"], 1);

    let sent = harness.notifier.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, harness.test_user_id);
    assert_eq!(sent[0].1, AlertChannel::Email);

    let setting: serde_json::Value = harness
        .server
        .get(&harness.user_path("/alerts"))
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .json();
    assert_eq!(setting["version"], 2);
    assert!(setting["last_triggered_at"].is_string());
}

#[tokio::test]
async fn admin_runs_need_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/run/alerts")
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn health_reports_payments() {
    let harness = TestHarness::new();

    let body: serde_json::Value = harness.server.get("/health").await.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["payments_configured"], true);
}
