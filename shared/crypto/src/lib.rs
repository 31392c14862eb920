//! Tenant-scoped cryptography
//!
//! A single 32-byte master key is imported at process start; every tenant gets
//! its own AES-256-GCM key derived with HKDF-SHA256. Session and refresh
//! token hashes are HMACs under the tenant key, so a row copied across tenant
//! boundaries never matches a lookup.

pub mod cipher;
pub mod keyring;
pub mod token;

pub use cipher::{TenantCipher, CIPHERTEXT_VERSION, MIN_FRAME_LEN};
pub use keyring::{Keyring, MasterKey};
pub use token::{hash, timing_safe_compare, token_pair, TokenPair};

use shared_error::AppError;

/// Crypto failures are terminal; callers log and surface them as `Internal`
/// without revealing which check failed.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid master key")]
    InvalidKey,

    #[error("invalid ciphertext format")]
    InvalidFormat,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("encryption failed")]
    EncryptFailed,
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        tracing::error!("Crypto failure: {}", err);
        AppError::Internal("Cryptographic operation failed".to_string())
    }
}
