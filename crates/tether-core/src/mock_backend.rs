//! Mock remote backend for testing
//!
//! Provides an in-memory [`RemoteBackend`] with upsert semantics and
//! scriptable failures, for exercising the queue, processor, and resolver
//! without a real network.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_core::{MockBackend, RemoteError};
//!
//! let backend = MockBackend::new();
//!
//! // Fail the next three deliveries, then succeed
//! backend.fail_next_n(3, RemoteError::Network("offline".into()));
//!
//! // Or fail everything until `recover()` is called
//! backend.fail_always(RemoteError::Rejected("bad payload".into()));
//! backend.recover();
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::entity::{EntityKind, EntityRecord, Operation};
use crate::error::RemoteError;
use crate::identity::{ItemId, UserId};
use crate::traits::{RemoteBackend, RemoteMutation};

/// A mutation the mock accepted
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub idempotency_key: ItemId,
    pub user_id: UserId,
    pub entity: EntityKind,
    pub operation: Operation,
    pub record_id: Option<String>,
    pub body: Value,
}

/// In-memory remote backend
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Accepted mutations, in arrival order (duplicates excluded)
    applied: Mutex<Vec<AppliedMutation>>,
    /// Idempotency keys already accepted
    seen_keys: Mutex<HashSet<ItemId>>,
    /// Current remote state keyed by (entity, record id)
    records: DashMap<(EntityKind, String), Value>,
    /// Records returned by `fetch`
    remote_records: DashMap<EntityKind, Vec<EntityRecord>>,
    /// One-shot failures consumed by the next calls to `apply`
    scripted_failures: Mutex<VecDeque<RemoteError>>,
    /// Failure returned by every call to `apply` until cleared
    persistent_failure: Mutex<Option<RemoteError>>,
    /// Failures for specific entity types
    entity_failures: DashMap<EntityKind, RemoteError>,
    /// Failure returned by `fetch`
    fetch_failure: Mutex<Option<RemoteError>>,
    /// Artificial latency applied to every `apply`
    delay: Mutex<Option<Duration>>,
    /// Total calls to `apply`, including failed and duplicate ones
    attempts: AtomicUsize,
    /// Calls that arrived with an already-seen idempotency key
    duplicates: AtomicUsize,
}

impl MockBackend {
    /// Create a backend that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call to `apply`
    pub fn fail_next(&self, error: RemoteError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Fail the next `n` calls to `apply`
    pub fn fail_next_n(&self, n: usize, error: RemoteError) {
        let mut failures = self.scripted_failures.lock();
        for _ in 0..n {
            failures.push_back(error.clone());
        }
    }

    /// Fail every call to `apply` until [`MockBackend::recover`]
    pub fn fail_always(&self, error: RemoteError) {
        *self.persistent_failure.lock() = Some(error);
    }

    /// Fail every call for one entity type
    pub fn fail_entity(&self, entity: EntityKind, error: RemoteError) {
        self.entity_failures.insert(entity, error);
    }

    /// Clear all scripted and persistent failures
    pub fn recover(&self) {
        self.scripted_failures.lock().clear();
        *self.persistent_failure.lock() = None;
        self.entity_failures.clear();
        *self.fetch_failure.lock() = None;
    }

    /// Fail calls to `fetch`
    pub fn fail_fetch(&self, error: RemoteError) {
        *self.fetch_failure.lock() = Some(error);
    }

    /// Add latency to every delivery
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Set the records `fetch` returns for an entity type
    pub fn set_remote(&self, entity: EntityKind, records: Vec<EntityRecord>) {
        self.remote_records.insert(entity, records);
    }

    /// Accepted mutations, in arrival order
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.applied.lock().clone()
    }

    /// Number of accepted (non-duplicate) mutations
    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }

    /// Total calls to `apply`
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Calls deduplicated by idempotency key
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Current remote body of a record, if it exists
    pub fn record(&self, entity: &EntityKind, record_id: &str) -> Option<Value> {
        self.records
            .get(&(entity.clone(), record_id.to_string()))
            .map(|v| v.clone())
    }

    fn next_failure(&self, entity: &EntityKind) -> Option<RemoteError> {
        if let Some(err) = self.entity_failures.get(entity) {
            return Some(err.clone());
        }
        if let Some(err) = self.scripted_failures.lock().pop_front() {
            return Some(err);
        }
        self.persistent_failure.lock().clone()
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn apply(&self, mutation: RemoteMutation<'_>) -> Result<(), RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.next_failure(mutation.entity) {
            return Err(err);
        }

        if !self.seen_keys.lock().insert(mutation.idempotency_key) {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        if let Some(record_id) = mutation.record_id {
            let key = (mutation.entity.clone(), record_id.to_string());
            if mutation.operation.is_upsert() {
                self.records.insert(key, mutation.body.clone());
            } else {
                self.records.remove(&key);
            }
        }

        self.applied.lock().push(AppliedMutation {
            idempotency_key: mutation.idempotency_key,
            user_id: mutation.user_id.clone(),
            entity: mutation.entity.clone(),
            operation: mutation.operation,
            record_id: mutation.record_id.map(str::to_string),
            body: mutation.body.clone(),
        });

        Ok(())
    }

    async fn fetch(
        &self,
        entity: &EntityKind,
        _user_id: &UserId,
    ) -> Result<Vec<EntityRecord>, RemoteError> {
        if let Some(err) = self.fetch_failure.lock().clone() {
            return Err(err);
        }
        Ok(self
            .remote_records
            .get(entity)
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}
