//! Secure store: encrypt and decrypt domain data at rest
//!
//! `encrypt` walks [`Algorithm::CHAIN`] in order, skipping ciphers the
//! platform lacks or the configuration forbids, and seals with the first
//! that succeeds. `decrypt` dispatches only on the tag stored in the blob.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use tether_core::{BLOB_VERSION, EncryptedBlob};

use crate::algorithm::{Algorithm, SecurityLevel};
use crate::cipher;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DeviceKey, KeyStore};

/// Configuration for the secure store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureStoreConfig {
    /// Ciphers the platform provides
    pub available: Vec<Algorithm>,
    /// Permit the BLAKE3 stream cipher when no AEAD is available
    pub allow_weak_fallback: bool,
    /// Permit plaintext dev encoding (also needs the `insecure-dev-cipher` feature)
    pub allow_dev_fallback: bool,
}

impl Default for SecureStoreConfig {
    fn default() -> Self {
        Self {
            available: Algorithm::CHAIN.to_vec(),
            allow_weak_fallback: false,
            allow_dev_fallback: false,
        }
    }
}

impl SecureStoreConfig {
    /// Restrict the platform's available ciphers
    pub fn with_available(mut self, available: impl IntoIterator<Item = Algorithm>) -> Self {
        self.available = available.into_iter().collect();
        self
    }

    pub fn with_weak_fallback(mut self, allow: bool) -> Self {
        self.allow_weak_fallback = allow;
        self
    }

    pub fn with_dev_fallback(mut self, allow: bool) -> Self {
        self.allow_dev_fallback = allow;
        self
    }

    /// Whether `encrypt` may use this algorithm
    pub fn permits(&self, algorithm: Algorithm) -> bool {
        if !self.available.contains(&algorithm) {
            return false;
        }
        match algorithm.security_level() {
            SecurityLevel::Strong => true,
            SecurityLevel::Weak => self.allow_weak_fallback,
            SecurityLevel::Insecure => {
                cfg!(feature = "insecure-dev-cipher") && self.allow_dev_fallback
            }
            SecurityLevel::NotEncryption => false,
        }
    }
}

/// Encrypts domain objects with the per-device key
///
/// The key is loaded from (or generated into) the [`KeyStore`] on first use
/// and cached for the lifetime of the store.
pub struct SecureStore {
    config: SecureStoreConfig,
    keys: Arc<dyn KeyStore>,
    key: OnceCell<DeviceKey>,
}

impl SecureStore {
    /// Create a secure store backed by the given key store
    pub fn new(config: SecureStoreConfig, keys: Arc<dyn KeyStore>) -> Self {
        Self {
            config,
            keys,
            key: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SecureStoreConfig {
        &self.config
    }

    /// The algorithm the next `encrypt` will try first, if any is permitted
    pub fn preferred_algorithm(&self) -> Option<Algorithm> {
        Algorithm::CHAIN
            .into_iter()
            .find(|a| self.config.permits(*a))
    }

    /// Serialize and encrypt `data`
    ///
    /// Returns [`CryptoError::EncryptionUnavailable`] when no permitted cipher
    /// succeeds; callers must then refuse to persist the data.
    pub async fn encrypt<T: Serialize + ?Sized>(&self, data: &T) -> CryptoResult<EncryptedBlob> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(data)?);
        self.encrypt_bytes(&plaintext).await
    }

    /// Encrypt raw bytes
    pub async fn encrypt_bytes(&self, plaintext: &[u8]) -> CryptoResult<EncryptedBlob> {
        let key = match self.device_key().await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Device key unavailable, refusing to encrypt");
                return Err(CryptoError::EncryptionUnavailable);
            }
        };

        for algorithm in Algorithm::CHAIN {
            if !self.config.permits(algorithm) {
                continue;
            }
            match cipher::seal(algorithm, key.as_bytes(), plaintext) {
                Ok((ciphertext, iv)) => {
                    if algorithm.security_level() < SecurityLevel::Strong {
                        warn!(%algorithm, "Sealed with a non-AEAD fallback cipher");
                    }
                    return Ok(EncryptedBlob {
                        ciphertext,
                        iv,
                        algorithm: algorithm.tag().to_string(),
                        version: BLOB_VERSION,
                    });
                }
                Err(e) => {
                    warn!(%algorithm, error = %e, "Cipher failed, trying next");
                }
            }
        }

        Err(CryptoError::EncryptionUnavailable)
    }

    /// Decrypt and deserialize a blob
    pub async fn decrypt<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> CryptoResult<T> {
        let plaintext = zeroize::Zeroizing::new(self.decrypt_bytes(blob).await?);
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Decrypt a blob to raw bytes
    pub async fn decrypt_bytes(&self, blob: &EncryptedBlob) -> CryptoResult<Vec<u8>> {
        let algorithm = Self::algorithm_of(blob)?;
        if !algorithm.is_reversible() {
            return Err(CryptoError::HashOnlyAlgorithm(blob.algorithm.clone()));
        }
        if blob.version != BLOB_VERSION {
            return Err(CryptoError::UnsupportedVersion {
                found: blob.version,
                supported: BLOB_VERSION,
            });
        }

        let key = self.device_key().await?;
        cipher::open(algorithm, key.as_bytes(), &blob.ciphertext, &blob.iv)
    }

    /// Parse the algorithm tag of a blob
    pub fn algorithm_of(blob: &EncryptedBlob) -> CryptoResult<Algorithm> {
        blob.algorithm.parse()
    }

    /// Security level of the cipher that produced a blob
    pub fn security_level_of(blob: &EncryptedBlob) -> CryptoResult<SecurityLevel> {
        Self::algorithm_of(blob).map(Algorithm::security_level)
    }

    async fn device_key(&self) -> CryptoResult<&DeviceKey> {
        self.key.get_or_try_init(|| self.load_or_generate_key()).await
    }

    async fn load_or_generate_key(&self) -> CryptoResult<DeviceKey> {
        if let Some(bytes) = self.keys.load().await? {
            let key = DeviceKey::from_bytes(&bytes)?;
            debug!(key_id = %key.key_id(), "Loaded device key");
            return Ok(key);
        }
        let key = DeviceKey::generate();
        self.keys.store(key.as_bytes()).await?;
        info!(key_id = %key.key_id(), "Generated new device key");
        Ok(key)
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("config", &self.config)
            .field("key_loaded", &self.key.initialized())
            .finish()
    }
}
