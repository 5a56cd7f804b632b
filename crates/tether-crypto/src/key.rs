//! Device key management
//!
//! Every device holds one 256-bit symmetric key. It is generated on first
//! use, persisted through a [`KeyStore`], and never leaves the device.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cipher::fingerprint;
use crate::error::{CryptoError, CryptoResult};

/// Key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// The per-device symmetric key
///
/// Key bytes are zeroed when the last copy is dropped.
#[derive(Clone)]
pub struct DeviceKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DeviceKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rng().fill_bytes(&mut key[..]);
        Self { key }
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the raw key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Short non-secret identifier for logs
    pub fn key_id(&self) -> String {
        fingerprint(&self.key[..])[..16].to_string()
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

/// Durable home of the device key
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load the persisted key bytes, if a key was ever stored
    async fn load(&self) -> CryptoResult<Option<Zeroizing<Vec<u8>>>>;

    /// Persist the key bytes, replacing any previous key
    async fn store(&self, key: &[u8]) -> CryptoResult<()>;
}

/// Process-local key store
///
/// Keys do not survive a restart, which makes every sealed blob written by
/// a previous process unreadable. Use only in tests and previews.
#[derive(Default)]
pub struct MemoryKeyStore {
    key: Mutex<Option<Zeroizing<Vec<u8>>>>,
    fail_with: Mutex<Option<String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent load/store fail (simulates a locked keychain)
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.fail_with.lock() = reason.map(str::to_string);
    }

    fn check(&self) -> CryptoResult<()> {
        match self.fail_with.lock().as_ref() {
            Some(reason) => Err(CryptoError::KeyStore(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load(&self) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        self.check()?;
        Ok(self.key.lock().clone())
    }

    async fn store(&self, key: &[u8]) -> CryptoResult<()> {
        self.check()?;
        *self.key.lock() = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }
}
