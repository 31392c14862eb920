//! MFA backup codes
//!
//! Ten codes of eight characters over the uppercase base32 alphabet, issued
//! once at enrollment. Storage format is `salt$sha256(salt || code_upper)`
//! with one random hex salt per secret. Codes are high-entropy (~40 bits), so
//! a salted single-round hash with linear scan and constant-time comparison
//! is sufficient.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const CODE_COUNT: usize = 10;
pub const CODE_LEN: usize = 8;
const SALT_BYTES: usize = 16;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Fresh set of plaintext backup codes
pub fn generate_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..CODE_COUNT)
        .map(|_| {
            (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect()
        })
        .collect()
}

/// Random per-secret salt, hex-encoded
pub fn new_salt() -> String {
    let mut rng = rand::thread_rng();
    let salt: [u8; SALT_BYTES] = rng.gen();
    hex::encode(salt)
}

fn digest(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(code.to_uppercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// `salt$digest` storage entry for one code
pub fn hash_code(salt: &str, code: &str) -> String {
    format!("{}${}", salt, digest(salt, code))
}

/// Linear scan over the stored entries; returns the index of the first match
///
/// Comparison is constant-time per entry. Case-insensitive on the code.
pub fn find_match(entries: &[String], code: &str) -> Option<usize> {
    let mut found: Option<usize> = None;

    for (index, entry) in entries.iter().enumerate() {
        let Some((salt, stored)) = entry.split_once('$') else {
            continue;
        };
        let candidate = digest(salt, code);
        if bool::from(candidate.as_bytes().ct_eq(stored.as_bytes())) && found.is_none() {
            found = Some(index);
        }
    }

    found
}
