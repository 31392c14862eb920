//! Tenant-scoped AES-GCM encryption with versioned framing
//!
//! Ciphertext layout: `version(1) || iv(12) || aes-gcm-ciphertext-and-tag`.
//! Frames failing the length, version or tag check all surface the same pair
//! of generic errors so a caller cannot distinguish which check failed.

use crate::keyring::Keyring;
use crate::CryptoError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use shared_context::TenantId;

/// Version byte emitted for new ciphertexts
pub const CIPHERTEXT_VERSION: u8 = 1;

/// version byte + 12-byte IV + at least an empty AEAD tag
pub const MIN_FRAME_LEN: usize = 14;

const IV_LEN: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Encrypt/decrypt and HMAC under per-tenant keys
///
/// The context-implicit variants read the tenant from the ambient request
/// context; the `_for` variants take it explicitly (used by system jobs that
/// iterate tenants).
#[derive(Clone)]
pub struct TenantCipher {
    keyring: Keyring,
}

impl TenantCipher {
    pub fn new(keyring: Keyring) -> Self {
        Self { keyring }
    }

    /// Encrypt under the current context's tenant key
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        self.encrypt_for(&shared_context::tenant_id(), plaintext)
    }

    /// Decrypt under the current context's tenant key
    pub fn decrypt(&self, frame: &[u8]) -> Result<String, CryptoError> {
        self.decrypt_for(&shared_context::tenant_id(), frame)
    }

    pub fn encrypt_for(&self, tenant_id: &TenantId, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        let key = self.keyring.tenant_key(tenant_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut frame = Vec::with_capacity(1 + IV_LEN + ciphertext.len());
        frame.push(CIPHERTEXT_VERSION);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    pub fn decrypt_for(&self, tenant_id: &TenantId, frame: &[u8]) -> Result<String, CryptoError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(CryptoError::InvalidFormat);
        }

        // Versions 1..=255 are accepted; 0 marks a malformed frame
        let version = frame[0];
        if version == 0 {
            return Err(CryptoError::InvalidFormat);
        }

        let iv = &frame[1..1 + IV_LEN];
        let ciphertext = &frame[1 + IV_LEN..];

        let key = self.keyring.tenant_key(tenant_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }

    /// Deterministic tenant-scoped digest, used for session and refresh token
    /// hashes. hex(HMAC-SHA256(tenant_key, input)).
    pub fn hmac_for(&self, tenant_id: &TenantId, input: &str) -> String {
        let key = self.keyring.tenant_key(tenant_id);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref())
            .expect("HMAC accepts any key length");
        mac.update(input.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// HMAC under the current context's tenant key
    pub fn hmac(&self, input: &str) -> String {
        self.hmac_for(&shared_context::tenant_id(), input)
    }
}
