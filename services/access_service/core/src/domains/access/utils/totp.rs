//! TOTP generation and verification
//!
//! RFC 6238 with HMAC-SHA256, 6 digits, a 30-second period and ±1 window of
//! tolerance. Codes compare in constant time; the matched window delta is
//! returned so the replay guard can mark the exact time step that was
//! consumed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub const PERIOD_SECONDS: i64 = 30;
pub const DIGITS: usize = 6;
/// ±1 step of tolerance
pub const WINDOW: i64 = 1;
pub const SECRET_LEN: usize = 20;

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

type HmacSha256 = Hmac<Sha256>;

/// Cryptographically random shared secret
pub fn generate_secret() -> Vec<u8> {
    use rand::RngCore;
    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

/// Time step for a given instant in milliseconds since the epoch
pub fn time_step(now_ms: i64) -> i64 {
    now_ms / (PERIOD_SECONDS * 1000)
}

/// 6-digit code for one time step
pub fn code_at(secret: &[u8], step: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation (RFC 4226 §5.3)
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    format!("{:06}", binary % 1_000_000)
}

/// Verify a code against the current step with ±`window` tolerance
///
/// Returns the matched delta so the caller can compute the consumed time
/// step. All candidate comparisons are constant-time and every window is
/// checked even after a match.
pub fn verify(secret: &[u8], code: &str, now_ms: i64, window: i64) -> Option<i64> {
    if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let current = time_step(now_ms);
    let mut matched: Option<i64> = None;

    for delta in -window..=window {
        let candidate = code_at(secret, current + delta);
        if bool::from(candidate.as_bytes().ct_eq(code.as_bytes())) && matched.is_none() {
            matched = Some(delta);
        }
    }

    matched
}

/// RFC 4648 base32 without padding, as used in provisioning URIs
pub fn base32_encode(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;

    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            output.push(BASE32_ALPHABET[index] as char);
        }
    }

    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        output.push(BASE32_ALPHABET[index] as char);
    }

    output
}

/// otpauth:// URI consumed by authenticator apps
pub fn provisioning_uri(issuer: &str, account: &str, secret: &[u8]) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA256&digits={}&period={}",
        issuer,
        account,
        base32_encode(secret),
        issuer,
        DIGITS,
        PERIOD_SECONDS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B secret for HMAC-SHA256
    const RFC_SECRET: &[u8] = b"12345678901234567890123456789012";

    #[test]
    fn test_rfc6238_vector() {
        // T = 59s → step 1 → TOTP-SHA256 46119246; 6-digit truncation
        assert_eq!(time_step(59_000), 1);
        assert_eq!(code_at(RFC_SECRET, 1), "119246");
    }

    #[test]
    fn test_verify_within_window() {
        let now_ms = 90_000; // step 3
        let code = code_at(RFC_SECRET, 3);
        assert_eq!(verify(RFC_SECRET, &code, now_ms, WINDOW), Some(0));

        let previous = code_at(RFC_SECRET, 2);
        assert_eq!(verify(RFC_SECRET, &previous, now_ms, WINDOW), Some(-1));

        let next = code_at(RFC_SECRET, 4);
        assert_eq!(verify(RFC_SECRET, &next, now_ms, WINDOW), Some(1));
    }

    #[test]
    fn test_verify_outside_window() {
        let now_ms = 90_000;
        let stale = code_at(RFC_SECRET, 1);
        assert_eq!(verify(RFC_SECRET, &stale, now_ms, WINDOW), None);
    }

    #[test]
    fn test_verify_rejects_malformed_codes() {
        assert_eq!(verify(RFC_SECRET, "12345", 90_000, WINDOW), None);
        assert_eq!(verify(RFC_SECRET, "1234567", 90_000, WINDOW), None);
        assert_eq!(verify(RFC_SECRET, "12a456", 90_000, WINDOW), None);
        assert_eq!(verify(RFC_SECRET, "", 90_000, WINDOW), None);
    }

    #[test]
    fn test_base32_known_values() {
        assert_eq!(base32_encode(b"Hello"), "JBSWY3DP");
        assert_eq!(base32_encode(b""), "");
        assert_eq!(base32_encode(b"f"), "MY");
    }

    #[test]
    fn test_generate_secret_length_and_uniqueness() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), SECRET_LEN);
        assert_ne!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn prop_generated_codes_always_verify(
            secret in proptest::collection::vec(proptest::num::u8::ANY, 16..32),
            step in 1i64..100_000_000,
        ) {
            let code = code_at(&secret, step);
            proptest::prop_assert_eq!(code.len(), DIGITS);
            proptest::prop_assert!(code.bytes().all(|b| b.is_ascii_digit()));

            let now_ms = step * PERIOD_SECONDS * 1000;
            proptest::prop_assert!(verify(&secret, &code, now_ms, WINDOW).is_some());
        }
    }

    #[test]
    fn test_provisioning_uri_shape() {
        let uri = provisioning_uri("ParametricPortal", "alice@example.com", b"Hello");
        assert!(uri.starts_with("otpauth://totp/ParametricPortal:alice@example.com?"));
        assert!(uri.contains("secret=JBSWY3DP"));
        assert!(uri.contains("algorithm=SHA256"));
        assert!(uri.contains("digits=6"));
        assert!(uri.contains("period=30"));
    }
}
