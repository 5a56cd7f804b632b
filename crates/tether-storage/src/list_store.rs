//! Serialized read-modify-write access to a persisted list
//!
//! The sync queue, dead-letter queue, and conflict history are each one JSON
//! array under one key. Concurrent enqueues and processor removals would
//! lose updates if they each loaded, edited, and saved the list on their
//! own, so every mutation goes through [`ListStore::mutate`], which holds an
//! async mutex across the whole load-edit-save cycle.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::trace;

use crate::RecordStore;
use crate::error::StorageError;

/// A persisted `Vec<T>` under a single key
///
/// All writers of a key must share one `ListStore` (wrap it in an `Arc`);
/// two instances over the same key do not exclude each other.
pub struct ListStore<T> {
    store: Arc<dyn RecordStore>,
    key: String,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ListStore<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(store: Arc<dyn RecordStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// The storage key this list lives under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current list (empty if never written)
    ///
    /// Reads do not take the lock; they see the last committed write.
    pub async fn load(&self) -> Result<Vec<T>, StorageError> {
        self.read().await
    }

    /// Apply `f` to the list and persist the result atomically with respect
    /// to other mutations through this store
    ///
    /// If `f` leaves the list unchanged it is still written back; callers
    /// that want to skip no-op writes should use [`ListStore::try_mutate`].
    pub async fn mutate<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Vec<T>) -> R,
    {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        let result = f(&mut items);
        self.write(&items).await?;
        Ok(result)
    }

    /// Like [`ListStore::mutate`], but `f` decides whether to persist
    ///
    /// `f` returns `(changed, result)`; the list is only written when
    /// `changed` is true.
    pub async fn try_mutate<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Vec<T>) -> (bool, R),
    {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        let (changed, result) = f(&mut items);
        if changed {
            self.write(&items).await?;
        }
        Ok(result)
    }

    /// Remove the list entirely
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.store.delete(&self.key).await?;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<T>, StorageError> {
        match self.store.get(&self.key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::deserialization(format!("{}: {}", self.key, e))),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, items: &[T]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(items)
            .map_err(|e| StorageError::serialization(format!("{}: {}", self.key, e)))?;
        trace!(key = %self.key, len = items.len(), "Persisting list");
        self.store.put(&self.key, &bytes).await
    }
}

impl<T> std::fmt::Debug for ListStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListStore").field("key", &self.key).finish()
    }
}
