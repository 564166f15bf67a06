//! Manual processor runs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::processor::{AlertCycleReport, TopupCycleReport};
use crate::state::AppState;

/// Run one auto top-up cycle now.
pub async fn run_topups(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<TopupCycleReport>, ApiError> {
    let processor = state
        .topups
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("payments are not configured".into()))?;

    tracing::info!(admin_id = %auth.admin_id, "Manual top-up cycle");
    Ok(Json(processor.process_all(Utc::now()).await?))
}

/// Run one low-balance alert cycle now.
pub async fn run_alerts(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
) -> Result<Json<AlertCycleReport>, ApiError> {
    tracing::info!(admin_id = %auth.admin_id, "Manual alert cycle");
    Ok(Json(state.alerts.process_all(Utc::now()).await?))
}
