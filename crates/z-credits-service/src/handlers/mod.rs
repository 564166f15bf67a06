//! API handlers.

pub mod admin;
pub mod credits;
pub mod health;
pub mod pricing;
pub mod settings;

use serde::Deserialize;

use z_credits_core::UserId;

use crate::error::ApiError;

/// Largest page any list endpoint returns.
const MAX_PAGE: usize = 200;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

impl PageQuery {
    /// The requested limit, capped.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.min(MAX_PAGE)
    }
}

fn default_limit() -> usize {
    50
}

/// Parse a user ID from a path segment.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse::<UserId>()
        .map_err(|_| ApiError::BadRequest(format!("invalid user id: {raw}")))
}
