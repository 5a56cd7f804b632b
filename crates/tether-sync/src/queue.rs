//! Durable mutation queue
//!
//! Local writes land here first and never wait on the network. The
//! processor drains the queue later; see [`crate::processor`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use tether_core::{
    Clock, DEFAULT_MAX_RETRIES, EntityKind, ErrorClass, ItemId, Operation, Payload, SyncQueueItem,
    UserId, record_id_of,
};
use tether_crypto::SecureStore;
use tether_storage::{ListStore, RecordStore, keys};

use crate::error::SyncResult;

/// Configuration for the sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Failed deliveries before an item is moved to the dead-letter queue
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl QueueConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome of recording a failed delivery on a queued item
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Still queued for the next pass
    Retrying(SyncQueueItem),
    /// Retries exhausted; the caller must dead-letter and remove it
    Exhausted(SyncQueueItem),
    /// The item left the queue while it was being delivered
    Gone,
}

/// Ordered, persisted list of pending mutations for one user
pub struct SyncQueue {
    items: ListStore<SyncQueueItem>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(
        store: Arc<dyn RecordStore>,
        user: &UserId,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            items: ListStore::new(store, keys::sync_queue(user)),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Durably record a local mutation
    ///
    /// Only touches local storage; delivery happens on the next pass.
    #[instrument(skip_all, fields(%entity, %operation))]
    pub async fn enqueue(
        &self,
        entity: EntityKind,
        operation: Operation,
        payload: impl Into<Payload>,
    ) -> SyncResult<ItemId> {
        let item = SyncQueueItem::new(
            entity,
            operation,
            payload.into(),
            self.config.max_retries,
            self.clock.now(),
        );
        let id = item.id;
        self.items.mutate(|items| items.push(item)).await?;
        debug!(item_id = %id, "Enqueued mutation");
        Ok(id)
    }

    /// Encrypt `data` with the secure store, then enqueue it
    ///
    /// The record id is captured before encryption so the backend can still
    /// upsert by id. If encryption is unavailable nothing is persisted and
    /// the error is returned.
    #[instrument(skip_all, fields(%entity, %operation))]
    pub async fn enqueue_sealed<T: Serialize + ?Sized>(
        &self,
        entity: EntityKind,
        operation: Operation,
        data: &T,
        secure: &SecureStore,
    ) -> SyncResult<ItemId> {
        let value = serde_json::to_value(data)?;
        let record_id = record_id_of(&value);
        let blob = secure.encrypt(&value).await?;

        let item = SyncQueueItem::new(
            entity,
            operation,
            Payload::Sealed(blob),
            self.config.max_retries,
            self.clock.now(),
        )
        .with_record_id(record_id);
        let id = item.id;
        self.items.mutate(|items| items.push(item)).await?;
        debug!(item_id = %id, "Enqueued sealed mutation");
        Ok(id)
    }

    /// Put an existing item back on the queue (dead-letter retry path)
    ///
    /// An item already queued under the same id is left as is, so a retry
    /// that is resubmitted twice is delivered once.
    pub async fn requeue(&self, item: SyncQueueItem) -> SyncResult<bool> {
        let id = item.id;
        let added = self
            .items
            .try_mutate(|items| {
                if items.iter().any(|i| i.id == id) {
                    (false, false)
                } else {
                    items.push(item);
                    (true, true)
                }
            })
            .await?;
        debug!(item_id = %id, added, "Requeued mutation");
        Ok(added)
    }

    /// All queued items in delivery order
    pub async fn pending(&self) -> SyncResult<Vec<SyncQueueItem>> {
        Ok(self.items.load().await?)
    }

    /// Queued items of one entity type, in delivery order
    pub async fn pending_for(&self, entity: &EntityKind) -> SyncResult<Vec<SyncQueueItem>> {
        let mut items = self.items.load().await?;
        items.retain(|i| &i.entity == entity);
        Ok(items)
    }

    pub async fn get(&self, id: ItemId) -> SyncResult<Option<SyncQueueItem>> {
        Ok(self.items.load().await?.into_iter().find(|i| i.id == id))
    }

    pub async fn len(&self) -> SyncResult<usize> {
        Ok(self.items.load().await?.len())
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Remove an item, returning whether it was queued
    pub async fn remove(&self, id: ItemId) -> SyncResult<bool> {
        let removed = self
            .items
            .try_mutate(|items| {
                let before = items.len();
                items.retain(|i| i.id != id);
                let removed = items.len() != before;
                (removed, removed)
            })
            .await?;
        Ok(removed)
    }

    /// Record a failed delivery against the stored copy of an item
    pub async fn record_failure(
        &self,
        id: ItemId,
        message: &str,
        class: ErrorClass,
    ) -> SyncResult<FailureOutcome> {
        let outcome = self
            .items
            .try_mutate(|items| match items.iter_mut().find(|i| i.id == id) {
                Some(item) => {
                    item.record_failure(message, class);
                    let snapshot = item.clone();
                    if snapshot.is_exhausted() {
                        (true, FailureOutcome::Exhausted(snapshot))
                    } else {
                        (true, FailureOutcome::Retrying(snapshot))
                    }
                }
                None => (false, FailureOutcome::Gone),
            })
            .await?;
        Ok(outcome)
    }

    /// Drop every queued item
    pub async fn clear(&self) -> SyncResult<()> {
        self.items.clear().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("key", &self.items.key())
            .field("config", &self.config)
            .finish()
    }
}
