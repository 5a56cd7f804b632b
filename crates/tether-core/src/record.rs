//! Persisted sync records: queue items, dead letters, and conflict records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, EntityRecord, Operation};
use crate::error::ErrorClass;
use crate::identity::ItemId;
use crate::payload::Payload;

/// Default retry ceiling before an item is escalated to the dead-letter queue
pub const DEFAULT_MAX_RETRIES: u32 = 8;

/// Maximum number of row snapshots kept per conflict record
pub const MAX_CONFLICTS_PER_RECORD: usize = 20;

/// A pending local mutation awaiting delivery to the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: ItemId,
    pub entity: EntityKind,
    pub operation: Operation,
    pub payload: Payload,
    /// Domain record id targeted by the mutation, when known
    pub record_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub last_error_class: Option<ErrorClass>,
}

impl SyncQueueItem {
    /// Create a fresh item with a new id and zero retries
    pub fn new(
        entity: EntityKind,
        operation: Operation,
        payload: Payload,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let record_id = payload.record_id();
        Self {
            id: ItemId::generate(),
            entity,
            operation,
            payload,
            record_id,
            created_at,
            retry_count: 0,
            max_retries,
            last_error: None,
            last_error_class: None,
        }
    }

    /// Override the record id (used when the payload is sealed)
    pub fn with_record_id(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }

    /// Record a failed delivery attempt
    pub fn record_failure(&mut self, message: impl Into<String>, class: ErrorClass) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(message.into());
        self.last_error_class = Some(class);
    }

    /// Whether the item has used up its retries
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// A mutation the processor gave up on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: ItemId,
    pub entity: EntityKind,
    pub operation: Operation,
    pub payload: Payload,
    pub record_id: Option<String>,
    pub error_message: String,
    pub error_class: ErrorClass,
    pub failed_at: DateTime<Utc>,
    /// Retries used before escalation
    pub retry_count: u32,
    pub can_retry: bool,
    pub archived: bool,
}

impl DeadLetterItem {
    /// Build a dead letter from an exhausted queue item
    pub fn from_exhausted(item: SyncQueueItem, failed_at: DateTime<Utc>) -> Self {
        let error_class = item.last_error_class.unwrap_or(ErrorClass::Unknown);
        Self {
            id: item.id,
            entity: item.entity,
            operation: item.operation,
            payload: item.payload,
            record_id: item.record_id,
            error_message: item
                .last_error
                .unwrap_or_else(|| "retries exhausted".to_string()),
            error_class,
            failed_at,
            retry_count: item.retry_count,
            can_retry: error_class.can_retry(),
            archived: false,
        }
    }

    /// Turn this dead letter back into a fresh queue item
    ///
    /// The item id is kept so the backend can still deduplicate a mutation
    /// that did reach it before the local bookkeeping failed.
    pub fn to_queue_item(&self, max_retries: u32, now: DateTime<Utc>) -> SyncQueueItem {
        SyncQueueItem {
            id: self.id,
            entity: self.entity.clone(),
            operation: self.operation,
            payload: self.payload.clone(),
            record_id: self.record_id.clone(),
            created_at: now,
            retry_count: 0,
            max_retries,
            last_error: None,
            last_error_class: None,
        }
    }

    /// Whether an automatic sweep should pick this item up
    pub fn is_sweepable(&self) -> bool {
        self.can_retry && !self.archived
    }
}

/// One divergent row captured during a merge pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: String,
    pub local: EntityRecord,
    pub remote: EntityRecord,
}

/// Audit entry for one merge pass with at least one divergent row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity: EntityKind,
    /// Number of divergent rows found (may exceed `conflicts.len()`)
    pub count: usize,
    pub at: DateTime<Utc>,
    pub conflicts: Vec<ConflictEntry>,
}

impl ConflictRecord {
    /// Build a record, keeping at most `cap` snapshots
    pub fn new(
        entity: EntityKind,
        mut conflicts: Vec<ConflictEntry>,
        at: DateTime<Utc>,
        cap: usize,
    ) -> Self {
        let count = conflicts.len();
        conflicts.truncate(cap);
        Self {
            entity,
            count,
            at,
            conflicts,
        }
    }
}
