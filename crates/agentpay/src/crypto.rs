//! Keyed MACs and constant-time comparison.
//!
//! Challenge memos are authenticated with HMAC-SHA256 over a length-prefixed
//! field list, so `("ab", "c")` and `("a", "bc")` never produce the same MAC.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8], fields: &[&[u8]]) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length, so new_from_slice cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC accepts any key length"),
    };
    for field in fields {
        mac.update(&(field.len() as u64).to_be_bytes());
        mac.update(field);
    }
    mac
}

/// Hex-encoded HMAC-SHA256 over `fields`.
pub fn mac_fields(secret: &[u8], fields: &[&[u8]]) -> String {
    hex_encode(keyed(secret, fields).finalize().into_bytes())
}

/// Check a (possibly truncated) hex MAC produced by [`mac_fields`].
///
/// The comparison runs in constant time over the expected prefix. An
/// empty or odd-length candidate never matches.
pub fn verify_mac_fields(secret: &[u8], fields: &[&[u8]], candidate_hex: &str) -> bool {
    let expected = mac_fields(secret, fields);
    if candidate_hex.is_empty() || candidate_hex.len() > expected.len() {
        return false;
    }
    let prefix = &expected.as_bytes()[..candidate_hex.len()];
    prefix
        .ct_eq(candidate_hex.to_ascii_lowercase().as_bytes())
        .into()
}

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to SHA-256 digests before the `subtle` comparison,
/// so timing reveals neither length nor content. Used for bearer tokens.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a).ct_eq(&Sha256::digest(b)).into()
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    bytes
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_roundtrip() {
        let mac = mac_fields(b"secret", &[b"weather-v1", b"10000"]);
        assert_eq!(mac.len(), 64);
        assert!(verify_mac_fields(b"secret", &[b"weather-v1", b"10000"], &mac));
        assert!(verify_mac_fields(b"secret", &[b"weather-v1", b"10000"], &mac[..32]));
    }

    #[test]
    fn test_mac_field_boundaries_matter() {
        let a = mac_fields(b"k", &[b"ab", b"c"]);
        let b = mac_fields(b"k", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_mac_wrong_secret_or_tampered_field() {
        let mac = mac_fields(b"secret-1", &[b"body"]);
        assert!(!verify_mac_fields(b"secret-2", &[b"body"], &mac));
        assert!(!verify_mac_fields(b"secret-1", &[b"tampered"], &mac));
    }

    #[test]
    fn test_mac_rejects_empty_and_oversized_candidates() {
        let mac = mac_fields(b"k", &[b"x"]);
        assert!(!verify_mac_fields(b"k", &[b"x"], ""));
        assert!(!verify_mac_fields(b"k", &[b"x"], &format!("{mac}00")));
        assert!(!verify_mac_fields(b"k", &[b"x"], "not-hex-zz"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"much longer string"));
        assert!(constant_time_eq(b"", b""));
    }
}
