//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, credits, health, pricing, settings};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent manual processor runs.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 2;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check and poll loop stats
///
/// ## Pricing (service key; writes need the admin key)
/// - `POST /v1/pricing/quote` - Price a quantity
/// - `GET|POST /v1/pricing/tiers`, `DELETE /v1/pricing/tiers/:id`
/// - `GET|POST /v1/pricing/packages`, `DELETE /v1/pricing/packages/:id`
///
/// ## Users (service key)
/// - `GET|PUT /v1/users/:user_id/topup`, `GET /v1/users/:user_id/topup/history`
/// - `GET|PUT /v1/users/:user_id/alerts`, `GET /v1/users/:user_id/alerts/history`
/// - `GET /v1/users/:user_id/balance`, `GET /v1/users/:user_id/transactions`
/// - `POST /v1/users/:user_id/usage` - Deduct consumed credits
/// - `POST /v1/users/:user_id/credits` - Grant credits (admin key)
/// - `POST /v1/transfers` - Move credits between users
///
/// ## Admin (admin key)
/// - `POST /v1/admin/run/topups` - Run a top-up cycle now
/// - `POST /v1/admin/run/alerts` - Run an alert cycle now
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let user_routes = Router::new()
        .route(
            "/topup",
            get(settings::get_topup).put(settings::put_topup),
        )
        .route("/topup/history", get(settings::topup_history))
        .route(
            "/alerts",
            get(settings::get_alert).put(settings::put_alert),
        )
        .route("/alerts/history", get(settings::alert_history))
        .route("/balance", get(credits::get_balance))
        .route("/transactions", get(credits::list_transactions))
        .route("/usage", post(credits::record_usage))
        .route("/credits", post(credits::grant_credits));

    let admin_routes = Router::new()
        .route("/run/topups", post(admin::run_topups))
        .route("/run/alerts", post(admin::run_alerts))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Pricing
        .route("/pricing/quote", post(pricing::quote))
        .route(
            "/pricing/tiers",
            get(pricing::list_tiers).post(pricing::upsert_tier),
        )
        .route("/pricing/tiers/:id", delete(pricing::delete_tier))
        .route(
            "/pricing/packages",
            get(pricing::list_packages).post(pricing::upsert_package),
        )
        .route("/pricing/packages/:id", delete(pricing::delete_package))
        // Users
        .nest("/users/:user_id", user_routes)
        .route("/transfers", post(credits::transfer))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
