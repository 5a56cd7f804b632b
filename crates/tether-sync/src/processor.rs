//! Queue processor
//!
//! Drains the sync queue in one pass: every item that is queued when the
//! pass starts is delivered once. Failures are classified and recorded on
//! the item; items that run out of retries are escalated to the dead-letter
//! queue.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use tether_core::{
    Clock, DeadLetterItem, EntityKind, ErrorClass, Payload, RemoteBackend, RemoteError,
    RemoteMutation, SyncEvent, SyncQueueItem, UserId,
};
use tether_crypto::SecureStore;

use crate::bus::InvalidationBus;
use crate::dead_letter::DeadLetterQueue;
use crate::error::SyncResult;
use crate::flight::FlightGuard;
use crate::notifier::{ErrorReporter, LogNotifier, NotifierConfig};
use crate::queue::{FailureOutcome, SyncQueue};

/// Configuration for the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Upper bound for one delivery; exceeding it counts as a network failure
    pub delivery_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

impl ProcessorConfig {
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

/// Result of one processing pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Items delivered and removed from the queue
    pub processed: usize,
    /// Failed delivery attempts, including those escalated
    pub failed: usize,
    /// Items escalated to the dead-letter queue in this pass
    pub moved_to_dlq: usize,
    /// Items held back behind an earlier failure of the same entity type
    pub deferred: usize,
    /// The pass did not run because another one was in progress
    pub skipped: bool,
}

impl ProcessSummary {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Why a single delivery failed
#[derive(Debug)]
struct DeliveryFailure {
    message: String,
    class: ErrorClass,
}

impl From<RemoteError> for DeliveryFailure {
    fn from(err: RemoteError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

/// What happened to an item whose delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureHandling {
    Retrying,
    DeadLettered,
    Gone,
}

#[derive(Debug, Default)]
struct PassState {
    summary: ProcessSummary,
    delivered: BTreeSet<EntityKind>,
    blocked: BTreeSet<EntityKind>,
    high_severity: usize,
}

/// Delivers queued mutations to the remote backend
pub struct SyncProcessor {
    user: UserId,
    queue: Arc<SyncQueue>,
    dead_letters: Arc<DeadLetterQueue>,
    backend: Arc<dyn RemoteBackend>,
    secure: Option<Arc<SecureStore>>,
    bus: Arc<InvalidationBus>,
    reporter: Arc<ErrorReporter>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    in_flight: AtomicBool,
}

impl SyncProcessor {
    pub fn new(
        user: UserId,
        queue: Arc<SyncQueue>,
        dead_letters: Arc<DeadLetterQueue>,
        backend: Arc<dyn RemoteBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reporter = Arc::new(ErrorReporter::new(
            Arc::new(LogNotifier),
            NotifierConfig::default(),
            clock.clone(),
        ));
        Self {
            user,
            queue,
            dead_letters,
            backend,
            secure: None,
            bus: Arc::new(InvalidationBus::new()),
            reporter,
            clock,
            config: ProcessorConfig::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Store used to open sealed payloads; without one they fail validation
    pub fn with_secure_store(mut self, secure: Arc<SecureStore>) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn with_bus(mut self, bus: Arc<InvalidationBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Whether a pass is running right now
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Deliver every currently queued item once
    ///
    /// Items of one entity type are delivered in enqueue order. Once an
    /// item fails and stays queued, the later items of its entity type are
    /// deferred to the next pass; other entity types keep flowing. An item
    /// escalated to the dead-letter queue no longer holds back its
    /// successors.
    ///
    /// Single-flight: a call made while a pass is running returns
    /// [`ProcessSummary::skipped`] without touching the queue. Errors are
    /// returned only when local bookkeeping fails; delivery failures are
    /// recorded on the items.
    #[instrument(skip(self), fields(user = %self.user.short_id()))]
    pub async fn process_queue(&self) -> SyncResult<ProcessSummary> {
        let Some(_guard) = FlightGuard::try_acquire(&self.in_flight) else {
            debug!("Processing pass already running, skipping");
            return Ok(ProcessSummary::skipped());
        };

        let items = self.queue.pending().await?;
        if items.is_empty() {
            return Ok(ProcessSummary::default());
        }

        let mut pass = PassState::default();
        let result = self.deliver_in_order(items, &mut pass).await;

        // Deliveries already made stay published even if bookkeeping failed
        if !pass.delivered.is_empty() {
            self.bus.publish(SyncEvent::SyncCompleted {
                entities: pass.delivered.into_iter().collect(),
                user_id: self.user.clone(),
                timestamp: self.clock.now(),
            });
        }
        self.reporter.report_pass(pass.high_severity);
        result?;

        let summary = pass.summary;
        info!(
            processed = summary.processed,
            failed = summary.failed,
            moved_to_dlq = summary.moved_to_dlq,
            deferred = summary.deferred,
            "Processing pass finished"
        );
        Ok(summary)
    }

    async fn deliver_in_order(
        &self,
        items: Vec<SyncQueueItem>,
        pass: &mut PassState,
    ) -> SyncResult<()> {
        for item in items {
            if pass.blocked.contains(&item.entity) {
                debug!(item_id = %item.id, entity = %item.entity, "Deferred behind failed predecessor");
                pass.summary.deferred += 1;
                continue;
            }

            match self.deliver(&item).await {
                Ok(()) => {
                    self.queue.remove(item.id).await?;
                    debug!(item_id = %item.id, entity = %item.entity, "Delivered");
                    pass.delivered.insert(item.entity);
                    pass.summary.processed += 1;
                }
                Err(failure) => {
                    pass.summary.failed += 1;
                    if failure.class.is_high_severity() {
                        pass.high_severity += 1;
                    }
                    match self.handle_failure(&item, failure).await? {
                        FailureHandling::Retrying => {
                            pass.blocked.insert(item.entity);
                        }
                        FailureHandling::DeadLettered => pass.summary.moved_to_dlq += 1,
                        FailureHandling::Gone => {}
                    }
                }
            }
        }
        Ok(())
    }

    async fn deliver(&self, item: &SyncQueueItem) -> Result<(), DeliveryFailure> {
        let body = self.open(&item.payload).await?;
        let mutation = RemoteMutation {
            idempotency_key: item.id,
            user_id: &self.user,
            entity: &item.entity,
            operation: item.operation,
            record_id: item.record_id.as_deref(),
            body: &body,
        };

        let timeout = self.config.delivery_timeout;
        match tokio::time::timeout(timeout, self.backend.apply(mutation)).await {
            Ok(result) => result.map_err(DeliveryFailure::from),
            Err(_) => Err(RemoteError::Timeout(timeout).into()),
        }
    }

    async fn open<'a>(&self, payload: &'a Payload) -> Result<Cow<'a, Value>, DeliveryFailure> {
        match payload {
            Payload::Plain(value) => Ok(Cow::Borrowed(value)),
            Payload::Sealed(blob) => {
                let Some(secure) = &self.secure else {
                    return Err(DeliveryFailure {
                        message: "sealed payload but no secure store configured".to_string(),
                        class: ErrorClass::Validation,
                    });
                };
                secure
                    .decrypt::<Value>(blob)
                    .await
                    .map(Cow::Owned)
                    .map_err(|e| DeliveryFailure {
                        message: format!("cannot open sealed payload: {e}"),
                        class: ErrorClass::Validation,
                    })
            }
        }
    }

    /// Record the failure on the item, escalating it once retries run out
    async fn handle_failure(
        &self,
        item: &SyncQueueItem,
        failure: DeliveryFailure,
    ) -> SyncResult<FailureHandling> {
        let outcome = self
            .queue
            .record_failure(item.id, &failure.message, failure.class)
            .await?;

        match outcome {
            FailureOutcome::Retrying(updated) => {
                debug!(
                    item_id = %updated.id,
                    class = %failure.class,
                    retry_count = updated.retry_count,
                    "Delivery failed, will retry"
                );
                Ok(FailureHandling::Retrying)
            }
            FailureOutcome::Exhausted(updated) => {
                let id = updated.id;
                let dead = DeadLetterItem::from_exhausted(updated, self.clock.now());
                // DLQ first: a crash in between leaves a duplicate, never a loss
                self.dead_letters.add(dead.clone()).await?;
                self.queue.remove(id).await?;
                warn!(
                    item_id = %id,
                    entity = %dead.entity,
                    class = %dead.error_class,
                    can_retry = dead.can_retry,
                    "Retries exhausted, moved to dead-letter queue"
                );
                self.reporter.report_dead_letter(&dead);
                Ok(FailureHandling::DeadLettered)
            }
            FailureOutcome::Gone => {
                debug!(item_id = %item.id, "Item left the queue during delivery");
                Ok(FailureHandling::Gone)
            }
        }
    }
}

impl std::fmt::Debug for SyncProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProcessor")
            .field("user", &self.user)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
