//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use z_credits_core::DEFAULT_UNIT_PRICE_USD;

/// Which `Store` implementation the binary opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// `RocksDB` under `data_dir`.
    RocksDb,
    /// Process-local maps; state is lost on restart.
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rocksdb" | "rocks" => Some(Self::RocksDb),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/z-credits").
    pub data_dir: String,

    /// Storage backend (default: `RocksDb`).
    pub storage_backend: StorageBackend,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Base price of one credit in USD.
    pub unit_price_usd: f64,

    /// Seconds between auto top-up cycles.
    pub topup_poll_seconds: u64,

    /// Seconds between low-balance alert cycles.
    pub alert_poll_seconds: u64,

    /// Maximum users processed concurrently within one cycle.
    pub processor_concurrency: usize,

    /// Payments API base URL (optional).
    pub payments_api_url: Option<String>,

    /// Payments API key (optional).
    pub payments_api_key: Option<String>,

    /// Notification webhook URL (optional; alerts are logged when unset).
    pub notify_webhook_url: Option<String>,

    /// Secret used to sign notification webhooks (optional).
    pub notify_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Payments secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentsSecrets {
    api_url: String,
    api_key: String,
}

/// Notification secrets file structure.
#[derive(Debug, Deserialize)]
struct NotifySecrets {
    webhook_url: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let (payments_api_url, payments_api_key) = load_payments_secrets();
        let (notify_webhook_url, notify_webhook_secret) = load_notify_secrets();
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            storage_backend: std::env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|s| {
                    let backend = StorageBackend::parse(&s);
                    if backend.is_none() {
                        tracing::warn!(value = %s, "Unknown STORAGE_BACKEND, using default");
                    }
                    backend
                })
                .unwrap_or(defaults.storage_backend),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            unit_price_usd: env_parse("UNIT_PRICE_USD")
                .filter(|price: &f64| price.is_finite() && *price > 0.0)
                .unwrap_or(defaults.unit_price_usd),
            topup_poll_seconds: env_parse("TOPUP_POLL_SECONDS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.topup_poll_seconds),
            alert_poll_seconds: env_parse("ALERT_POLL_SECONDS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.alert_poll_seconds),
            processor_concurrency: env_parse("PROCESSOR_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.processor_concurrency),
            payments_api_url,
            payments_api_key,
            notify_webhook_url,
            notify_webhook_secret,
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }

    /// Interval between top-up cycles.
    #[must_use]
    pub const fn topup_interval(&self) -> Duration {
        Duration::from_secs(self.topup_poll_seconds)
    }

    /// Interval between alert cycles.
    #[must_use]
    pub const fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_poll_seconds)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Load payments secrets from file or environment.
fn load_payments_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/payments.json",
        "z-credits/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentsSecrets>(path) {
            tracing::info!(path = %path, "Loaded payments secrets from file");
            return (Some(secrets.api_url), Some(secrets.api_key));
        }
    }

    tracing::debug!("Payments secrets file not found, using environment variables");
    (
        std::env::var("PAYMENTS_API_URL").ok(),
        std::env::var("PAYMENTS_API_KEY").ok(),
    )
}

/// Load notification secrets from file or environment.
fn load_notify_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/notify.json",
        "z-credits/.secrets/notify.json",
        "../.secrets/notify.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<NotifySecrets>(path) {
            tracing::info!(path = %path, "Loaded notification secrets from file");
            return (Some(secrets.webhook_url), secrets.webhook_secret);
        }
    }

    tracing::debug!("Notification secrets file not found, using environment variables");
    (
        std::env::var("NOTIFY_WEBHOOK_URL").ok(),
        std::env::var("NOTIFY_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/z-credits".into(),
            storage_backend: StorageBackend::RocksDb,
            service_api_key: None,
            admin_api_key: None,
            unit_price_usd: DEFAULT_UNIT_PRICE_USD,
            topup_poll_seconds: 300,
            alert_poll_seconds: 300,
            processor_concurrency: 16,
            payments_api_url: None,
            payments_api_key: None,
            notify_webhook_url: None,
            notify_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_names() {
        assert_eq!(StorageBackend::parse("RocksDB"), Some(StorageBackend::RocksDb));
        assert_eq!(StorageBackend::parse(" memory "), Some(StorageBackend::Memory));
        assert_eq!(StorageBackend::parse("postgres"), None);
    }

    #[test]
    fn defaults_poll_every_five_minutes() {
        let config = ServiceConfig::default();
        assert_eq!(config.topup_interval(), Duration::from_secs(300));
        assert_eq!(config.alert_interval(), Duration::from_secs(300));
        assert!((config.unit_price_usd - 0.01).abs() < f64::EPSILON);
    }
}
