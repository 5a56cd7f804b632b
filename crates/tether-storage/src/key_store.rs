//! Device key persistence on a [`RecordStore`]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use tether_crypto::{CryptoError, CryptoResult, KeyStore};

use crate::RecordStore;
use crate::keys::DEVICE_KEY;

const KEY_RECORD_VERSION: u8 = 1;

/// Postcard-encoded record under [`DEVICE_KEY`]
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyRecord {
    version: u8,
    created_at_millis: i64,
    key: Vec<u8>,
}

/// [`KeyStore`] that keeps the device key in the same store as the data
///
/// Platform keychains should be preferred where available; this is the
/// fallback for targets without one.
pub struct RecordKeyStore {
    store: Arc<dyn RecordStore>,
}

impl RecordKeyStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeyStore for RecordKeyStore {
    async fn load(&self) -> CryptoResult<Option<Zeroizing<Vec<u8>>>> {
        let Some(bytes) = self
            .store
            .get(DEVICE_KEY)
            .await
            .map_err(|e| CryptoError::KeyStore(e.to_string()))?
        else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);

        let record: KeyRecord = postcard::from_bytes(&bytes)
            .map_err(|e| CryptoError::KeyStore(format!("corrupt key record: {e}")))?;
        if record.version != KEY_RECORD_VERSION {
            return Err(CryptoError::KeyStore(format!(
                "unknown key record version {}",
                record.version
            )));
        }
        Ok(Some(Zeroizing::new(record.key.clone())))
    }

    async fn store(&self, key: &[u8]) -> CryptoResult<()> {
        let record = KeyRecord {
            version: KEY_RECORD_VERSION,
            created_at_millis: Utc::now().timestamp_millis(),
            key: key.to_vec(),
        };
        let bytes = Zeroizing::new(
            postcard::to_allocvec(&record).map_err(|e| CryptoError::KeyStore(e.to_string()))?,
        );
        self.store
            .put(DEVICE_KEY, &bytes)
            .await
            .map_err(|e| CryptoError::KeyStore(e.to_string()))
    }
}
