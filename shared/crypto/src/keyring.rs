//! Master key import and per-tenant key derivation

use crate::CryptoError;
use base64::Engine;
use hkdf::Hkdf;
use moka::sync::Cache;
use sha2::Sha256;
use shared_context::TenantId;
use std::sync::Arc;
use std::time::Duration;

/// HKDF info prefix; changing it rotates every derived key
const DERIVATION_INFO_PREFIX: &str = "parametric-tenant-key-v1:";

/// Derived keys are cached for a day; eviction is LRU at capacity
const KEY_CACHE_CAPACITY: u64 = 1_000;
const KEY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 32-byte master key, base64-imported at process start
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey)?;

        let key: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("key", &"[REDACTED]").finish()
    }
}

/// Process-wide key material: the master key plus a cache of derived tenant
/// keys. Reads are lock-free; a missing entry is derived exactly once per key
/// even under concurrent lookups.
#[derive(Clone)]
pub struct Keyring {
    master: MasterKey,
    derived: Cache<TenantId, Arc<[u8; 32]>>,
}

impl Keyring {
    pub fn new(master: MasterKey) -> Self {
        let derived = Cache::builder()
            .max_capacity(KEY_CACHE_CAPACITY)
            .time_to_live(KEY_CACHE_TTL)
            .build();

        Self { master, derived }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(MasterKey::from_base64(encoded)?))
    }

    /// Per-tenant AES-256-GCM key
    ///
    /// HKDF-SHA256(master, salt = 32 zero bytes, info = prefix + tenant id).
    /// Different tenant ids always yield different keys.
    pub fn tenant_key(&self, tenant_id: &TenantId) -> Arc<[u8; 32]> {
        self.derived
            .get_with(tenant_id.clone(), || Arc::new(derive(&self.master, tenant_id)))
    }

    /// Number of derived keys currently cached
    pub fn cached_keys(&self) -> u64 {
        self.derived.run_pending_tasks();
        self.derived.entry_count()
    }
}

fn derive(master: &MasterKey, tenant_id: &TenantId) -> [u8; 32] {
    let salt = [0u8; 32];
    let hk = Hkdf::<Sha256>::new(Some(&salt), master.as_bytes());

    let info = format!("{}{}", DERIVATION_INFO_PREFIX, tenant_id);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_keyring() -> Keyring {
        // base64 of 32 'A' bytes
        Keyring::from_base64("QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=").unwrap()
    }

    #[test]
    fn test_master_key_rejects_wrong_length() {
        assert!(MasterKey::from_base64("c2hvcnQ=").is_err()); // "short"
        assert!(MasterKey::from_base64("not base64 !!!").is_err());
    }

    #[test]
    fn test_distinct_tenants_distinct_keys() {
        let keyring = test_keyring();
        let a = keyring.tenant_key(&TenantId::new("tenant-a"));
        let b = keyring.tenant_key(&TenantId::new("tenant-b"));
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let keyring = test_keyring();
        let first = keyring.tenant_key(&TenantId::new("tenant-a"));
        let second = keyring.tenant_key(&TenantId::new("tenant-a"));
        assert_eq!(*first, *second);

        // A fresh keyring with the same master derives the same key
        let other = test_keyring();
        assert_eq!(*first, *other.tenant_key(&TenantId::new("tenant-a")));
    }

    #[test]
    fn test_keys_are_cached() {
        let keyring = test_keyring();
        keyring.tenant_key(&TenantId::new("a"));
        keyring.tenant_key(&TenantId::new("b"));
        keyring.tenant_key(&TenantId::new("a"));
        assert_eq!(keyring.cached_keys(), 2);
    }

    #[test]
    fn test_debug_redacts_key() {
        let keyring = test_keyring();
        assert!(!format!("{:?}", keyring.master).contains("AAAA"));
    }
}
