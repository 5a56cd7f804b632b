//! Encrypted local copy of each entity type
//!
//! The conflict resolver merges remote rows against this cache and writes
//! the winner set back. Rows are sealed with the secure store and the
//! resulting [`EncryptedBlob`] is postcard-encoded under
//! `entity_cache/<user>/<entity>`.

use std::sync::Arc;

use tracing::debug;

use tether_core::{EncryptedBlob, EntityKind, EntityRecord, UserId};
use tether_crypto::SecureStore;

use crate::RecordStore;
use crate::error::StorageError;
use crate::keys;

/// Sealed per-entity record cache for one user
pub struct SealedCache {
    store: Arc<dyn RecordStore>,
    secure: Arc<SecureStore>,
    user: UserId,
}

impl SealedCache {
    pub fn new(store: Arc<dyn RecordStore>, secure: Arc<SecureStore>, user: UserId) -> Self {
        Self {
            store,
            secure,
            user,
        }
    }

    /// Load the cached rows of an entity type (empty if nothing was cached)
    pub async fn load(&self, entity: &EntityKind) -> Result<Vec<EntityRecord>, StorageError> {
        let key = keys::entity_cache(&self.user, entity);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        let blob: EncryptedBlob = postcard::from_bytes(&bytes)?;
        let records: Vec<EntityRecord> = self.secure.decrypt(&blob).await?;
        debug!(%entity, count = records.len(), "Loaded entity cache");
        Ok(records)
    }

    /// Replace the cached rows of an entity type
    ///
    /// Fails with [`tether_crypto::CryptoError::EncryptionUnavailable`]
    /// (wrapped) rather than writing plaintext.
    pub async fn save(
        &self,
        entity: &EntityKind,
        records: &[EntityRecord],
    ) -> Result<(), StorageError> {
        let key = keys::entity_cache(&self.user, entity);
        let blob = self.secure.encrypt(records).await?;
        let bytes = postcard::to_allocvec(&blob)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        self.store.put(&key, &bytes).await?;
        debug!(%entity, count = records.len(), "Saved entity cache");
        Ok(())
    }

    /// Drop the cache of one entity type
    pub async fn evict(&self, entity: &EntityKind) -> Result<bool, StorageError> {
        self.store
            .delete(&keys::entity_cache(&self.user, entity))
            .await
    }

    /// Drop every entity cache of this user
    pub async fn evict_all(&self) -> Result<usize, StorageError> {
        let entries = self
            .store
            .scan_prefix(&keys::entity_cache_prefix(&self.user))
            .await?;
        let mut removed = 0;
        for (key, _) in entries {
            if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for SealedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedCache")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;
    use chrono::{TimeZone, Utc};
    use tether_crypto::{MemoryKeyStore, SecureStoreConfig};

    fn cache(user: &str) -> (Arc<InMemoryRecordStore>, SealedCache) {
        let backing = Arc::new(InMemoryRecordStore::new());
        let secure = Arc::new(SecureStore::new(
            SecureStoreConfig::default(),
            Arc::new(MemoryKeyStore::new()),
        ));
        let cache = SealedCache::new(
            backing.clone(),
            secure,
            UserId::new(user).unwrap(),
        );
        (backing, cache)
    }

    fn record(id: &str, value: i64) -> EntityRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        EntityRecord::new(id, ts).with_field("value", value)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (backing, cache) = cache("alice");
        let records = vec![record("1", 5), record("2", 9)];

        cache.save(&EntityKind::MoodEntry, &records).await.unwrap();
        let loaded = cache.load(&EntityKind::MoodEntry).await.unwrap();
        assert_eq!(loaded, records);

        // Stored bytes are not plaintext JSON
        let raw = backing
            .get("entity_cache/alice/mood_entry")
            .await
            .unwrap()
            .unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());
    }

    #[tokio::test]
    async fn test_missing_cache_is_empty() {
        let (_, cache) = cache("alice");
        assert!(cache.load(&EntityKind::Compulsion).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_all() {
        let (backing, cache) = cache("alice");
        cache
            .save(&EntityKind::MoodEntry, &[record("1", 1)])
            .await
            .unwrap();
        cache
            .save(&EntityKind::Compulsion, &[record("2", 2)])
            .await
            .unwrap();
        backing.put("sync_queue/alice", b"[]").await.unwrap();

        assert_eq!(cache.evict_all().await.unwrap(), 2);
        assert_eq!(backing.len(), 1);
    }
}
