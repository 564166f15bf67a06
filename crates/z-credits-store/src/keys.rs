//! Key encoding utilities for `RocksDB`.
//!
//! Per-user history is keyed `user_id (16 bytes) || ulid (16 bytes)`. ULIDs
//! start with a big-endian millisecond timestamp, so a prefix scan over one
//! user returns their entries in creation order.

use z_credits_core::UserId;

/// Width of a UUID or ULID in bytes.
const ID_LEN: usize = 16;

/// Key for records owned by a single user (settings, balances).
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Key for a record identified by a bare UUID (tiers, packages).
#[must_use]
pub fn id_key(id: &[u8; 16]) -> Vec<u8> {
    id.to_vec()
}

/// Key for a per-user history entry.
#[must_use]
pub fn user_scoped_key(user_id: &UserId, entry_id: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&entry_id);
    key
}

/// Prefix shared by all of a user's history entries.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// The greatest possible key under [`user_prefix`], used to start a reverse scan.
#[must_use]
pub fn user_prefix_last(user_id: &UserId) -> Vec<u8> {
    user_scoped_key(user_id, [0xFF; ID_LEN])
}

/// Encode a balance value.
#[must_use]
pub fn encode_balance(balance: i64) -> [u8; 8] {
    balance.to_be_bytes()
}

/// Decode a balance value. Returns `None` if the value is not 8 bytes.
#[must_use]
pub fn decode_balance(bytes: &[u8]) -> Option<i64> {
    bytes.try_into().ok().map(i64::from_be_bytes)
}
