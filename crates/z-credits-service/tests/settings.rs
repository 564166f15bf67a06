//! Top-up and alert settings integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

#[tokio::test]
async fn create_then_update_topup_setting() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "threshold_amount": 100,
            "topup_amount": 1000,
            "max_monthly_spend_cents": 5000,
            "payment_method_id": "pm_1"
        }))
        .await;
    response.assert_status_ok();
    let created: serde_json::Value = response.json();
    assert_eq!(created["version"], 1);
    assert_eq!(created["is_enabled"], true);
    assert_eq!(created["monthly_spend_cents"], 0);

    let response = harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({
            "version": 1,
            "threshold_amount": 200,
            "topup_amount": 1000,
            "payment_method_id": "pm_1"
        }))
        .await;
    response.assert_status_ok();
    let updated: serde_json::Value = response.json();
    assert_eq!(updated["version"], 2);
    assert_eq!(updated["threshold_amount"], 200);
    assert!(updated["max_monthly_spend_cents"].is_null());

    let fetched: serde_json::Value = harness
        .server
        .get(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .json();
    assert_eq!(fetched, updated);
}

#[tokio::test]
async fn stale_version_conflicts() {
    let harness = TestHarness::new();
    let body = json!({ "threshold_amount": 100, "topup_amount": 1000 });

    harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await
        .assert_status_ok();

    // Creating again without a version must not overwrite.
    let response = harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&body)
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let error: serde_json::Value = response.json();
    assert_eq!(error["error"]["code"], "version_conflict");
    assert_eq!(error["error"]["details"]["current_version"], 1);
}

#[tokio::test]
async fn invalid_topup_setting_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({ "threshold_amount": -5, "topup_amount": 1000 }))
        .await;

    response.assert_status_bad_request();
    harness
        .server
        .get(&harness.user_path("/topup"))
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn alert_setting_round_trip() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put(&harness.user_path("/alerts"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({ "threshold_amount": 50, "alert_types": ["email", "in_app"] }))
        .await;
    response.assert_status_ok();
    let created: serde_json::Value = response.json();
    assert_eq!(created["version"], 1);
    assert_eq!(created["alert_types"], json!(["email", "in_app"]));
    assert!(created["last_triggered_at"].is_null());
}

#[tokio::test]
async fn alert_setting_needs_a_channel() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .put(&harness.user_path("/alerts"))
        .add_header("x-api-key", &harness.service_api_key)
        .json(&json!({ "threshold_amount": 50, "alert_types": [] }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn malformed_user_id_is_bad_request() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/users/not-a-uuid/topup")
        .add_header("x-api-key", &harness.service_api_key)
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn settings_need_service_key() {
    let harness = TestHarness::new();

    harness
        .server
        .get(&harness.user_path("/alerts"))
        .await
        .assert_status_unauthorized();
}
