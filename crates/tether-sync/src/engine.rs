//! Per-user sync service
//!
//! [`SyncEngine`] wires the queue, processor, dead-letter queue, resolver,
//! sealed entity cache, invalidation bus, and error reporter for one user.
//! Storage, network, encryption, and time are injected; nothing is global.
//!
//! ```rust,ignore
//! let engine = SyncEngine::builder(user, store, backend, secure)
//!     .with_config(SyncConfig::default())
//!     .build();
//!
//! engine.enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 75})).await?;
//! let summary = engine.process_queue().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};

use tether_core::{
    Clock, ConflictRecord, DeadLetterItem, EntityKind, EntityRecord, ItemId, Operation, Payload,
    RemoteBackend, RemoteError, SyncEvent, SyncQueueItem, SystemClock, UserId,
};
use tether_crypto::SecureStore;
use tether_storage::{RecordStore, SealedCache};

use crate::SyncConfig;
use crate::bus::InvalidationBus;
use crate::dead_letter::{DeadLetterQueue, DeadLetterStats, DeadLetterSweep};
use crate::error::SyncResult;
use crate::notifier::{ErrorReporter, LogNotifier, UserNotifier};
use crate::processor::{ProcessSummary, SyncProcessor};
use crate::queue::SyncQueue;
use crate::resolver::{ConflictResolver, MergeOutcome};

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    user: UserId,
    store: Arc<dyn RecordStore>,
    backend: Arc<dyn RemoteBackend>,
    secure: Arc<SecureStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    notifier: Arc<dyn UserNotifier>,
    bus: Option<Arc<InvalidationBus>>,
}

impl SyncEngineBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share a bus with other engines or with the cache layer
    pub fn with_bus(mut self, bus: Arc<InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> SyncEngine {
        let Self {
            user,
            store,
            backend,
            secure,
            clock,
            config,
            notifier,
            bus,
        } = self;

        let bus = bus.unwrap_or_default();
        let queue = Arc::new(SyncQueue::new(
            store.clone(),
            &user,
            config.queue,
            clock.clone(),
        ));
        let dead_letters = Arc::new(DeadLetterQueue::new(
            store.clone(),
            &user,
            queue.clone(),
            config.dead_letter,
            clock.clone(),
        ));
        let reporter = Arc::new(ErrorReporter::new(notifier, config.notifier, clock.clone()));
        let processor = SyncProcessor::new(
            user.clone(),
            queue.clone(),
            dead_letters.clone(),
            backend.clone(),
            clock.clone(),
        )
        .with_secure_store(secure.clone())
        .with_bus(bus.clone())
        .with_reporter(reporter)
        .with_config(config.processor);
        let resolver = ConflictResolver::new(store.clone(), &user, config.resolver, clock.clone());
        let cache = SealedCache::new(store, secure.clone(), user.clone());

        SyncEngine {
            user,
            backend,
            secure,
            clock,
            config,
            queue,
            dead_letters,
            processor,
            resolver,
            cache,
            bus,
        }
    }
}

/// Offline sync service for one user
pub struct SyncEngine {
    user: UserId,
    backend: Arc<dyn RemoteBackend>,
    secure: Arc<SecureStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    queue: Arc<SyncQueue>,
    dead_letters: Arc<DeadLetterQueue>,
    processor: SyncProcessor,
    resolver: ConflictResolver,
    cache: SealedCache,
    bus: Arc<InvalidationBus>,
}

impl SyncEngine {
    /// Start building an engine with the system clock and default config
    pub fn builder(
        user: UserId,
        store: Arc<dyn RecordStore>,
        backend: Arc<dyn RemoteBackend>,
        secure: Arc<SecureStore>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            user,
            store,
            backend,
            secure,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
            notifier: Arc::new(LogNotifier),
            bus: None,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    pub fn secure_store(&self) -> &Arc<SecureStore> {
        &self.secure
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Durably record a local mutation; never touches the network
    pub async fn enqueue(
        &self,
        entity: EntityKind,
        operation: Operation,
        payload: impl Into<Payload>,
    ) -> SyncResult<ItemId> {
        self.queue.enqueue(entity, operation, payload).await
    }

    /// Encrypt and record a local mutation
    ///
    /// Fails with an encryption-unavailable error, persisting nothing, when
    /// no permitted cipher works on this device.
    pub async fn enqueue_sealed<T: Serialize + ?Sized>(
        &self,
        entity: EntityKind,
        operation: Operation,
        data: &T,
    ) -> SyncResult<ItemId> {
        self.queue
            .enqueue_sealed(entity, operation, data, &self.secure)
            .await
    }

    pub async fn pending(&self) -> SyncResult<Vec<SyncQueueItem>> {
        self.queue.pending().await
    }

    pub async fn pending_count(&self) -> SyncResult<usize> {
        self.queue.len().await
    }

    /// Deliver everything currently queued
    pub async fn process_queue(&self) -> SyncResult<ProcessSummary> {
        self.processor.process_queue().await
    }

    // ========================================================================
    // Dead letters
    // ========================================================================

    pub async fn dead_letters(&self, limit: Option<usize>) -> SyncResult<Vec<DeadLetterItem>> {
        self.dead_letters.list(limit).await
    }

    pub async fn dead_letter_stats(&self) -> SyncResult<DeadLetterStats> {
        self.dead_letters.statistics().await
    }

    /// Put one dead letter back on the sync queue
    pub async fn retry_dead_letter(&self, id: ItemId) -> SyncResult<()> {
        self.dead_letters.retry(id).await
    }

    pub async fn process_dead_letter_queue(&self) -> SyncResult<DeadLetterSweep> {
        self.dead_letters.process_dead_letter_queue().await
    }

    pub async fn archive_old_dead_letters(&self) -> SyncResult<usize> {
        self.dead_letters.archive_old_items().await
    }

    pub async fn archive_dead_letter(&self, id: ItemId) -> SyncResult<()> {
        self.dead_letters.archive(id).await
    }

    pub async fn prune_dead_letters(&self, older_than: Duration) -> SyncResult<usize> {
        self.dead_letters.prune_archived(older_than).await
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// Merge two collections of one entity type; conflicts go to the audit log
    pub async fn merge(
        &self,
        entity: &EntityKind,
        local: &[EntityRecord],
        remote: &[EntityRecord],
    ) -> Vec<EntityRecord> {
        self.resolver.merge(entity, local, remote).await
    }

    /// Pull remote state for an entity type and merge it into the local cache
    ///
    /// Returns the merged winner set, which also replaces the cached copy.
    #[instrument(skip(self), fields(user = %self.user.short_id()))]
    pub async fn reconcile(&self, entity: &EntityKind) -> SyncResult<Vec<EntityRecord>> {
        let timeout = self.config.processor.delivery_timeout;
        let remote = tokio::time::timeout(timeout, self.backend.fetch(entity, &self.user))
            .await
            .map_err(|_| RemoteError::Timeout(timeout))??;
        let local = self.cache.load(entity).await?;

        let MergeOutcome { records, conflicts } =
            self.resolver.merge_detailed(entity, &local, &remote).await;
        self.cache.save(entity, &records).await?;

        info!(
            records = records.len(),
            conflicts = conflicts.len(),
            "Reconciled with remote"
        );
        self.bus.publish(SyncEvent::EntityMerged {
            entity: entity.clone(),
            user_id: self.user.clone(),
            conflicts: conflicts.len(),
            timestamp: self.clock.now(),
        });
        Ok(records)
    }

    /// Locally cached records of an entity type
    pub async fn cached(&self, entity: &EntityKind) -> SyncResult<Vec<EntityRecord>> {
        Ok(self.cache.load(entity).await?)
    }

    /// Replace the locally cached records of an entity type
    pub async fn cache_local(&self, entity: &EntityKind, records: &[EntityRecord]) -> SyncResult<()> {
        self.cache.save(entity, records).await?;
        Ok(())
    }

    pub async fn conflict_history(&self) -> SyncResult<Vec<ConflictRecord>> {
        self.resolver.history().await
    }

    pub async fn clear_conflict_history(&self) -> SyncResult<()> {
        self.resolver.clear_history().await
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Announce that AI-derived data behind `hook` is stale
    pub fn invalidate_ai(&self, hook: impl Into<String>) {
        self.bus.publish(SyncEvent::AiInvalidation {
            hook: hook.into(),
            user_id: self.user.clone(),
            timestamp: self.clock.now(),
        });
    }

    /// Drop every persisted namespace of this user (sign-out)
    #[instrument(skip(self), fields(user = %self.user.short_id()))]
    pub async fn clear_user_data(&self) -> SyncResult<()> {
        self.queue.clear().await?;
        self.dead_letters.clear().await?;
        self.resolver.clear_history().await?;
        let evicted = self.cache.evict_all().await?;
        info!(evicted, "Cleared user data");
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("user", &self.user)
            .field("processor", &self.processor)
            .finish_non_exhaustive()
    }
}
