//! Z-Credits service.
//!
//! This crate runs the two background processors of the credit system and
//! exposes an operator HTTP API:
//!
//! - Auto top-up: charge users whose balance has fallen to their threshold
//! - Low-balance alerts: notify users at most once per 24 hours
//! - Pricing tiers, bulk packages and quotes
//! - Credit balance, ledger and transfers
//!
//! # Authentication
//!
//! 1. **Service API keys** (`x-api-key`) - For backend services
//! 2. **Admin API keys** (`x-admin-key`) - For pricing changes, grants and manual runs

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers are async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod payments;
pub mod processor;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use notify::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
pub use payments::{ChargeRequest, HttpPaymentGateway, PaymentError, PaymentGateway, PaymentReceipt};
pub use processor::{AlertProcessor, TopupProcessor, UserLocks};
pub use routes::create_router;
pub use scheduler::{AlertJob, PollHandle, PollJob, PollMonitor, PollScheduler, PollStats, TopupJob};
pub use state::AppState;
