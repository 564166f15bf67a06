//! Credit balance, ledger and transfer handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use z_credits_core::{CreditTransaction, CreditTransfer, UserId, ValidationError};

use super::{parse_user_id, PageQuery};
use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// User ID.
    pub user_id: UserId,
    /// Balance in credits.
    pub balance: i64,
}

/// Get a user's credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let balance = state.store.get_balance(&user_id)?;

    Ok(Json(BalanceResponse { user_id, balance }))
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<CreditTransaction>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List a user's ledger.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit();
    let mut transactions = state
        .store
        .list_transactions(&user_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    transactions.truncate(limit);

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Kinds of credit an admin can grant.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Paid outside the auto top-up flow.
    Purchase,
    /// Free credits.
    Bonus,
    /// Returned credits.
    Refund,
}

/// Grant credits request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Credits to add.
    pub amount: i64,
    /// Kind of grant.
    pub kind: GrantKind,
    /// Reason recorded on the ledger entry.
    pub reason: String,
}

/// Ledger write response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// The new ledger entry.
    pub transaction_id: String,
    /// Balance after the entry.
    pub balance: i64,
}

fn positive_amount(amount: i64) -> Result<(), ApiError> {
    if amount <= 0 {
        return Err(ValidationError::OutOfRange {
            field: "amount",
            value: amount.to_string(),
            reason: "must be > 0",
        }
        .into());
    }
    Ok(())
}

/// Add credits to a user's balance (admin only).
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    positive_amount(body.amount)?;

    let transaction = match body.kind {
        GrantKind::Purchase => CreditTransaction::purchase(user_id, body.amount, body.reason),
        GrantKind::Bonus => CreditTransaction::bonus(user_id, body.amount, body.reason),
        GrantKind::Refund => CreditTransaction::refund(user_id, body.amount, body.reason),
    };
    let balance = state.store.apply_transaction(&transaction)?;

    tracing::info!(
        admin_id = %auth.admin_id,
        user_id = %user_id,
        amount = body.amount,
        balance,
        "Credits granted"
    );

    Ok(Json(LedgerResponse {
        transaction_id: transaction.id.to_string(),
        balance,
    }))
}

/// Usage request.
#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    /// Credits consumed.
    pub amount: i64,
    /// What the credits were spent on.
    pub description: String,
}

/// Deduct consumed credits. Fails with 402 rather than overdrawing.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(user_id): Path<String>,
    Json(body): Json<UsageRequest>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    positive_amount(body.amount)?;

    let transaction = CreditTransaction::usage(user_id, body.amount, body.description);
    let balance = state.store.apply_transaction(&transaction)?;

    tracing::debug!(
        user_id = %user_id,
        service = %auth.service_name,
        amount = body.amount,
        balance,
        "Usage recorded"
    );

    Ok(Json(LedgerResponse {
        transaction_id: transaction.id.to_string(),
        balance,
    }))
}

/// Transfer response.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    /// Sender balance after the transfer.
    pub from_balance: i64,
    /// Recipient balance after the transfer.
    pub to_balance: i64,
}

/// Move credits between two users.
pub async fn transfer(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreditTransfer>,
) -> Result<Json<TransferResponse>, ApiError> {
    body.validate()?;
    let (from_balance, to_balance) = state.store.transfer(&body)?;

    tracing::info!(
        from = %body.from,
        to = %body.to,
        amount = body.amount,
        service = %auth.service_name,
        "Credits transferred"
    );

    Ok(Json(TransferResponse {
        from_balance,
        to_balance,
    }))
}
