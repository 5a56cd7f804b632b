//! Dead-letter queue
//!
//! Mutations that exhaust their retries land here instead of being dropped.
//! Retryable items are swept back into the sync queue periodically; the rest
//! wait for an explicit retry or age out into the archive.
//!
//! ```text
//! queued ──► delivered
//!    │
//!    └─► retry-exhausted ──► dead-letter(can_retry?) ──► queued
//!                                                   └──► archived
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tether_core::{Clock, DeadLetterItem, ItemId, UserId};
use tether_storage::{ListStore, RecordStore, keys};

use crate::error::{SyncError, SyncResult};
use crate::flight::FlightGuard;
use crate::queue::SyncQueue;

/// Configuration for the dead-letter queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Items that failed longer ago than this are archived by `archive_old_items`
    pub retention: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
        }
    }
}

impl DeadLetterConfig {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// Counts for the operator view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    pub total: usize,
    /// Non-archived items the automatic sweep will pick up
    pub retryable: usize,
    pub archived: usize,
}

/// Result of one automatic sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterSweep {
    /// Items moved back into the sync queue
    pub retried: usize,
    /// Items whose resubmission failed; they stay dead-lettered
    pub failed: usize,
    /// The sweep did not run because another one was in progress
    pub skipped: bool,
}

impl DeadLetterSweep {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Persisted dead-letter queue for one user
pub struct DeadLetterQueue {
    items: ListStore<DeadLetterItem>,
    queue: Arc<SyncQueue>,
    config: DeadLetterConfig,
    clock: Arc<dyn Clock>,
    sweeping: AtomicBool,
}

impl DeadLetterQueue {
    pub fn new(
        store: Arc<dyn RecordStore>,
        user: &UserId,
        queue: Arc<SyncQueue>,
        config: DeadLetterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            items: ListStore::new(store, keys::dead_letter(user)),
            queue,
            config,
            clock,
            sweeping: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    /// Record an escalated item
    ///
    /// Keyed by item id: adding the same id again replaces the entry, so an
    /// escalation repeated after a crash still yields one dead letter.
    pub async fn add(&self, item: DeadLetterItem) -> SyncResult<()> {
        let id = item.id;
        self.items
            .mutate(|items| match items.iter_mut().find(|i| i.id == id) {
                Some(existing) => *existing = item,
                None => items.push(item),
            })
            .await?;
        Ok(())
    }

    /// Dead letters, most recent failure first
    pub async fn list(&self, limit: Option<usize>) -> SyncResult<Vec<DeadLetterItem>> {
        let mut items = self.items.load().await?;
        items.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    pub async fn get(&self, id: ItemId) -> SyncResult<Option<DeadLetterItem>> {
        Ok(self.items.load().await?.into_iter().find(|i| i.id == id))
    }

    pub async fn statistics(&self) -> SyncResult<DeadLetterStats> {
        let items = self.items.load().await?;
        Ok(DeadLetterStats {
            total: items.len(),
            retryable: items.iter().filter(|i| i.is_sweepable()).count(),
            archived: items.iter().filter(|i| i.archived).count(),
        })
    }

    /// Hand a dead letter to `resubmit`; drop it from the queue only if that
    /// succeeds
    ///
    /// Success here means "accepted back into the sync queue", not "delivered".
    #[instrument(skip(self, resubmit), fields(item_id = %id))]
    pub async fn retry_dead_letter_item<F, Fut>(&self, id: ItemId, resubmit: F) -> SyncResult<()>
    where
        F: FnOnce(DeadLetterItem) -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let item = self
            .get(id)
            .await?
            .ok_or(SyncError::DeadLetterNotFound(id))?;

        resubmit(item).await?;
        self.remove(id).await?;
        info!("Dead letter resubmitted");
        Ok(())
    }

    /// Retry through the default path: back into the sync queue with a
    /// fresh retry budget
    pub async fn retry(&self, id: ItemId) -> SyncResult<()> {
        let queue = self.queue.clone();
        let max_retries = queue.config().max_retries;
        let now = self.clock.now();
        self.retry_dead_letter_item(id, |item| async move {
            queue.requeue(item.to_queue_item(max_retries, now)).await?;
            Ok(())
        })
        .await
    }

    /// Retry every non-archived, retryable item
    ///
    /// Runs single-flight: an overlapping call returns
    /// [`DeadLetterSweep::skipped`] immediately.
    #[instrument(skip(self))]
    pub async fn process_dead_letter_queue(&self) -> SyncResult<DeadLetterSweep> {
        let Some(_guard) = FlightGuard::try_acquire(&self.sweeping) else {
            debug!("Dead-letter sweep already running, skipping");
            return Ok(DeadLetterSweep::skipped());
        };

        let candidates: Vec<ItemId> = self
            .items
            .load()
            .await?
            .iter()
            .filter(|i| i.is_sweepable())
            .map(|i| i.id)
            .collect();

        let mut sweep = DeadLetterSweep::default();
        for id in candidates {
            match self.retry(id).await {
                Ok(()) => sweep.retried += 1,
                // Removed or archived between load and retry
                Err(SyncError::DeadLetterNotFound(_)) => {}
                Err(e) => {
                    warn!(item_id = %id, error = %e, "Dead-letter resubmission failed");
                    sweep.failed += 1;
                }
            }
        }

        if sweep.retried > 0 || sweep.failed > 0 {
            info!(
                retried = sweep.retried,
                failed = sweep.failed,
                "Dead-letter sweep finished"
            );
        }
        Ok(sweep)
    }

    /// Archive items whose failure is older than the retention window
    ///
    /// Returns the number of items newly archived.
    pub async fn archive_old_items(&self) -> SyncResult<usize> {
        let cutoff = self.cutoff(self.config.retention);
        let archived = self
            .items
            .try_mutate(|items| {
                let mut count = 0;
                for item in items.iter_mut() {
                    if !item.archived && item.failed_at < cutoff {
                        item.archived = true;
                        count += 1;
                    }
                }
                (count > 0, count)
            })
            .await?;
        if archived > 0 {
            info!(archived, "Archived old dead letters");
        }
        Ok(archived)
    }

    /// Archive one item (manual dismissal)
    pub async fn archive(&self, id: ItemId) -> SyncResult<()> {
        let found = self
            .items
            .try_mutate(|items| match items.iter_mut().find(|i| i.id == id) {
                Some(item) => {
                    let changed = !item.archived;
                    item.archived = true;
                    (changed, true)
                }
                None => (false, false),
            })
            .await?;
        if found {
            Ok(())
        } else {
            Err(SyncError::DeadLetterNotFound(id))
        }
    }

    /// Delete archived items that failed more than `older_than` ago
    pub async fn prune_archived(&self, older_than: Duration) -> SyncResult<usize> {
        let cutoff = self.cutoff(older_than);
        let pruned = self
            .items
            .try_mutate(|items| {
                let before = items.len();
                items.retain(|i| !(i.archived && i.failed_at < cutoff));
                let pruned = before - items.len();
                (pruned > 0, pruned)
            })
            .await?;
        if pruned > 0 {
            info!(pruned, "Pruned archived dead letters");
        }
        Ok(pruned)
    }

    /// Remove an item, returning whether it existed
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

    pub async fn clear(&self) -> SyncResult<()> {
        self.items.clear().await?;
        Ok(())
    }

    fn cutoff(&self, age: Duration) -> DateTime<Utc> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl std::fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("key", &self.items.key())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
