//! Sync-specific error types

use thiserror::Error;

use tether_core::{CoreError, IdentityError, ItemId, RemoteError};
use tether_crypto::CryptoError;
use tether_storage::StorageError;

/// Errors surfaced by the sync engine
///
/// Delivery failures inside a processing pass are not errors of the pass:
/// they are recorded on the queue item. A `SyncError` means the local
/// bookkeeping itself could not be done.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Dead-letter item not found: {0}")]
    DeadLetterNotFound(ItemId),

    #[error("Resubmission failed: {0}")]
    Resubmit(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl SyncError {
    /// Whether this is the hard failure of the secure store
    ///
    /// Callers of `enqueue_sealed` use this to tell the user the entry was
    /// not saved rather than retrying silently.
    pub fn is_encryption_unavailable(&self) -> bool {
        matches!(
            self,
            SyncError::Crypto(CryptoError::EncryptionUnavailable)
                | SyncError::Storage(StorageError::Crypto(CryptoError::EncryptionUnavailable))
        )
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
