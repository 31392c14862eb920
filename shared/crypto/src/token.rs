//! Opaque tokens, digests and constant-time comparison

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// A freshly minted opaque token and its SHA-256 digest
///
/// The plaintext is handed to the client exactly once; only the hash touches
/// storage or logs.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub token: String,
    pub hash: String,
}

/// Random time-ordered token plus its digest
pub fn token_pair() -> TokenPair {
    let token = Uuid::now_v7().simple().to_string();
    let hash = hash(&token);
    TokenPair { token, hash }
}

/// hex(SHA-256(input)), 64 characters
pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Constant-time equality
///
/// Equal-length inputs compare without data-dependent branches; unequal
/// lengths scan max(|a|, |b|) bytes before returning false so observation
/// time depends only on the longer length.
pub fn timing_safe_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() == b.len() {
        return a.ct_eq(b).into();
    }

    let max = a.len().max(b.len());
    let mut acc = 1u8;
    for i in 0..max {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        acc |= x ^ y;
    }
    // acc is never zero here; the loop only evens out timing
    std::hint::black_box(acc);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_shape() {
        let digest = hash("input");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, hash("input"));
        assert_ne!(digest, hash("Input"));
    }

    #[test]
    fn test_token_pair_hash_matches() {
        let pair = token_pair();
        assert_eq!(pair.hash, hash(&pair.token));
        assert_eq!(pair.token.len(), 32); // simple uuid format, no hyphens
    }

    #[test]
    fn test_token_pairs_unique() {
        let a = token_pair();
        let b = token_pair();
        assert_ne!(a.token, b.token);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_compare() {
        assert!(timing_safe_compare(b"abcdef", b"abcdef"));
        assert!(!timing_safe_compare(b"abcdef", b"abcdeg"));
        assert!(!timing_safe_compare(b"abc", b"abcdef"));
        assert!(!timing_safe_compare(b"abcdef", b""));
        assert!(timing_safe_compare(b"", b""));
    }
}
