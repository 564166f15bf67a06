//! Per-user top-up and alert settings, and their history.
//!
//! Writes are compare-and-swap: a client reads a setting, edits it, and sends
//! back the `version` it read. Omitting `version` means "create", which fails
//! with 409 if the setting already exists.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use z_credits_core::{AlertChannel, AlertRecord, AlertSetting, TopupRecord, TopupSetting};
use z_credits_store::Versioned;

use super::{parse_user_id, PageQuery};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// A setting together with the version to send back on update.
#[derive(Debug, Serialize)]
pub struct SettingResponse<T> {
    /// Current version.
    pub version: u64,
    /// The setting.
    #[serde(flatten)]
    pub setting: T,
}

impl<T> From<Versioned<T>> for SettingResponse<T> {
    fn from(record: Versioned<T>) -> Self {
        Self {
            version: record.version,
            setting: record.value,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Top-up
// ============================================================================

/// Top-up setting update. Spend tracking fields are owned by the service.
#[derive(Debug, Deserialize)]
pub struct TopupSettingInput {
    /// Version this update is based on; absent to create.
    pub version: Option<u64>,
    /// Whether auto top-up is on (default: true).
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Fire at or below this balance.
    pub threshold_amount: i64,
    /// Credits bought per top-up.
    pub topup_amount: i64,
    /// Monthly spend cap in cents.
    #[serde(default)]
    pub max_monthly_spend_cents: Option<i64>,
    /// Payment method to charge.
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// Get a user's top-up setting.
pub async fn get_topup(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<SettingResponse<TopupSetting>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let record = state
        .store
        .get_topup_setting(&user_id)?
        .ok_or_else(|| ApiError::NotFound("Top-up setting not found".into()))?;

    Ok(Json(record.into()))
}

/// Create or update a user's top-up setting.
pub async fn put_topup(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(user_id): Path<String>,
    Json(body): Json<TopupSettingInput>,
) -> Result<Json<SettingResponse<TopupSetting>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let now = Utc::now();

    let mut setting = state
        .store
        .get_topup_setting(&user_id)?
        .map_or_else(
            || TopupSetting::new(user_id, body.threshold_amount, body.topup_amount, now),
            |record| record.value,
        );
    setting.is_enabled = body.is_enabled;
    setting.threshold_amount = body.threshold_amount;
    setting.topup_amount = body.topup_amount;
    setting.max_monthly_spend_cents = body.max_monthly_spend_cents;
    setting.payment_method_id = body.payment_method_id;
    setting.validate()?;

    let saved = state.store.save_topup_setting(&setting, body.version)?;

    tracing::info!(
        user_id = %user_id,
        service = %auth.service_name,
        version = saved.version,
        enabled = setting.is_enabled,
        "Top-up setting saved"
    );

    Ok(Json(saved.into()))
}

/// List a user's top-up attempts, newest first.
pub async fn topup_history(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<TopupRecord>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    Ok(Json(state.store.list_topup_records(&user_id, query.limit())?))
}

// ============================================================================
// Alerts
// ============================================================================

/// Alert setting update. The cooldown timestamp is owned by the service.
#[derive(Debug, Deserialize)]
pub struct AlertSettingInput {
    /// Version this update is based on; absent to create.
    pub version: Option<u64>,
    /// Whether the alert is armed (default: true).
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    /// Alert at or below this balance.
    pub threshold_amount: i64,
    /// Delivery channels.
    pub alert_types: Vec<AlertChannel>,
}

/// Get a user's alert setting.
pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<SettingResponse<AlertSetting>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let record = state
        .store
        .get_alert_setting(&user_id)?
        .ok_or_else(|| ApiError::NotFound("Alert setting not found".into()))?;

    Ok(Json(record.into()))
}

/// Create or update a user's alert setting.
pub async fn put_alert(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(user_id): Path<String>,
    Json(body): Json<AlertSettingInput>,
) -> Result<Json<SettingResponse<AlertSetting>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;

    let mut setting = state
        .store
        .get_alert_setting(&user_id)?
        .map_or_else(
            || AlertSetting::new(user_id, body.threshold_amount, Vec::new()),
            |record| record.value,
        );
    setting.is_enabled = body.is_enabled;
    setting.threshold_amount = body.threshold_amount;
    setting.alert_types = body.alert_types;
    setting.validate()?;

    let saved = state.store.save_alert_setting(&setting, body.version)?;

    tracing::info!(
        user_id = %user_id,
        service = %auth.service_name,
        version = saved.version,
        channels = setting.alert_types.len(),
        "Alert setting saved"
    );

    Ok(Json(saved.into()))
}

/// List a user's alert deliveries, newest first.
pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<AlertRecord>>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    Ok(Json(state.store.list_alert_records(&user_id, query.limit())?))
}
