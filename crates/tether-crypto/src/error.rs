//! Error types for tether-crypto

use thiserror::Error;

/// Errors that can occur in the secure store
#[derive(Debug, Error)]
pub enum CryptoError {
    /// No permitted cipher could seal the data; nothing was written
    #[error("Encryption unavailable: no permitted cipher succeeded")]
    EncryptionUnavailable,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Algorithm {0} is a one-way hash and cannot be decrypted")]
    HashOnlyAlgorithm(String),

    #[error("Unsupported blob version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
