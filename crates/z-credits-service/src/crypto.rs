//! Cryptographic helpers for signing outbound webhooks.
//!
//! Receivers verify a delivery by recomputing the HMAC over `"{t}.{body}"` and
//! comparing it with [`constant_time_eq`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the signature header on webhook deliveries.
pub const SIGNATURE_HEADER: &str = "x-zcredits-signature";

/// Compute HMAC-SHA256 and return hex-encoded result.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // HMAC-SHA256 accepts keys of any size (RFC 2104); the error arm is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build the signature header value for `body` sent at unix time `timestamp`.
///
/// Format: `t=<timestamp>,v1=<hex hmac of "{timestamp}.{body}">`.
#[must_use]
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{body}"));
    format!("t={timestamp},v1={signature}")
}

/// Check a signature header produced by [`sign_payload`].
#[must_use]
pub fn verify_signature(secret: &str, header: &str, body: &str) -> bool {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return false;
    };
    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{body}"));
    constant_time_eq(&expected, signature)
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_produces_correct_length() {
        let result = hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog");
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn hmac_sha256_different_inputs() {
        assert_ne!(
            hmac_sha256_hex("secret", "message1"),
            hmac_sha256_hex("secret", "message2")
        );
    }

    #[test]
    fn signed_payload_verifies() {
        let header = sign_payload("whsec", 1_700_000_000, r#"{"a":1}"#);
        assert!(header.starts_with("t=1700000000,v1="));
        assert!(verify_signature("whsec", &header, r#"{"a":1}"#));
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign_payload("whsec", 1_700_000_000, r#"{"a":1}"#);
        assert!(!verify_signature("whsec", &header, r#"{"a":2}"#));
        assert!(!verify_signature("other", &header, r#"{"a":1}"#));
        assert!(!verify_signature("whsec", "v1=abc", r#"{"a":1}"#));
    }

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
