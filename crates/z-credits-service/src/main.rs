//! Z-Credits Service - auto top-up, low-balance alerts and the credits API
//!
//! This is the main entry point for the z-credits service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use z_credits_service::{
    create_router, AlertJob, AppState, PollScheduler, ServiceConfig, StorageBackend, TopupJob,
};
use z_credits_store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,z_credits=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Z-Credits Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        storage = ?config.storage_backend,
        unit_price_usd = config.unit_price_usd,
        topup_poll_seconds = config.topup_poll_seconds,
        alert_poll_seconds = config.alert_poll_seconds,
        payments_configured = config.payments_api_url.is_some(),
        webhook_configured = config.notify_webhook_url.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config)?;
    let state = AppState::new(store, config.clone());

    // Start the poll loops
    let scheduler = PollScheduler::new();
    let mut handles = Vec::new();
    if let Some(topups) = &state.topups {
        handles.push(scheduler.start(
            Arc::new(TopupJob::new(Arc::clone(topups))),
            config.topup_interval(),
        ));
    }
    handles.push(scheduler.start(
        Arc::new(AlertJob::new(Arc::clone(&state.alerts))),
        config.alert_interval(),
    ));
    let state = state.with_pollers(handles.iter().map(|h| h.monitor()).collect());

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, waiting for in-flight cycles");
    scheduler.shutdown();
    for handle in handles {
        handle.stop().await;
    }

    Ok(())
}

fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store - state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::RocksDb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(z_credits_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::RocksDb => Err("built without the rocksdb-backend feature".into()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
