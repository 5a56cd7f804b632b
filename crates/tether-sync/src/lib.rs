//! # Tether Sync
//!
//! Offline-first sync for Tether.
//!
//! Local writes are recorded in a durable FIFO queue and delivered to the
//! remote backend by explicit processing passes. Items that keep failing are
//! escalated to a dead-letter queue, where they are retried periodically or
//! archived. Remote state is folded into the local cache with a
//! last-write-wins merge that records divergent rows for audit.
//!
//! ## Components
//!
//! - [`SyncQueue`]: Durable, ordered mutation queue
//! - [`SyncProcessor`]: Single-flight delivery pass with retry bookkeeping
//! - [`DeadLetterQueue`]: Escalated mutations, sweep and archival
//! - [`ConflictResolver`]: LWW merge with a bounded conflict log
//! - [`InvalidationBus`]: Typed publish/subscribe for cache invalidation
//! - [`ErrorReporter`]: Rate-limited user notifications
//! - [`SyncEngine`]: Per-user facade wiring all of the above
//! - [`SyncScheduler`]: Background timers calling the engine
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_sync::{SyncConfig, SyncEngine, SyncScheduler};
//!
//! let engine = Arc::new(
//!     SyncEngine::builder(user, store, backend, secure)
//!         .with_config(SyncConfig::default())
//!         .build(),
//! );
//! let scheduler = SyncScheduler::start(engine.clone(), engine.config().scheduler);
//!
//! engine.enqueue(EntityKind::MoodEntry, Operation::Create, json!({"id": "m1", "mood": 75})).await?;
//! scheduler.on_foreground();
//! ```

pub mod bus;
pub mod dead_letter;
pub mod engine;
pub mod error;
mod flight;
pub mod notifier;
pub mod processor;
pub mod queue;
pub mod resolver;
pub mod scheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use bus::{InvalidationBus, SubscriptionId};
pub use dead_letter::{DeadLetterConfig, DeadLetterQueue, DeadLetterStats, DeadLetterSweep};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use notifier::{ErrorReporter, LogNotifier, Notification, NotifierConfig, UserNotifier};
pub use processor::{ProcessSummary, ProcessorConfig, SyncProcessor};
pub use queue::{FailureOutcome, QueueConfig, SyncQueue};
pub use resolver::{ConflictLog, ConflictResolver, MergeOutcome, ResolverConfig, lww_merge};
pub use scheduler::{SchedulerConfig, SyncScheduler};

/// Configuration for the sync engine
///
/// Combines configuration for all sync components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub queue: QueueConfig,
    pub processor: ProcessorConfig,
    pub dead_letter: DeadLetterConfig,
    pub resolver: ResolverConfig,
    pub notifier: NotifierConfig,
    pub scheduler: SchedulerConfig,
}

impl SyncConfig {
    /// Short timeouts and intervals for tests
    ///
    /// Retry ceiling, retention window, and conflict caps keep their
    /// production values so behaviour under test matches the app.
    pub fn testing() -> Self {
        Self {
            processor: ProcessorConfig::default().with_delivery_timeout(Duration::from_secs(1)),
            notifier: NotifierConfig::default().with_min_interval(Duration::ZERO),
            scheduler: SchedulerConfig {
                queue_interval: Duration::from_millis(100),
                dlq_interval: Duration::from_millis(200),
                dlq_startup_delay: Duration::from_millis(50),
            },
            ..Self::default()
        }
    }
}
