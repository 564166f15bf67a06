//! Health check handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::scheduler::PollStats;
use crate::state::AppState;

/// Status of one background poll loop.
#[derive(Debug, Serialize)]
pub struct PollerStatus {
    /// Job name.
    pub name: &'static str,
    /// Loop counters.
    #[serde(flatten)]
    pub stats: PollStats,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Whether auto top-up can charge users.
    pub payments_configured: bool,
    /// Background poll loops.
    pub pollers: Vec<PollerStatus>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "z-credits".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        payments_configured: state.has_payments(),
        pollers: state
            .pollers
            .iter()
            .map(|monitor| PollerStatus {
                name: monitor.name(),
                stats: monitor.stats(),
            })
            .collect(),
    })
}
