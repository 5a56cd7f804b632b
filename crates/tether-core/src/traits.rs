//! Core traits for Tether
//!
//! - [`RemoteBackend`]: the network collaborator the processor delivers to
//! - [`Clock`]: Time abstraction for testability

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::entity::{EntityKind, EntityRecord, Operation};
use crate::error::RemoteError;
use crate::identity::{ItemId, UserId};

/// A single mutation as sent to the remote backend
#[derive(Debug, Clone, Copy)]
pub struct RemoteMutation<'a> {
    /// Queue item id; backends deduplicate retried deliveries on it
    pub idempotency_key: ItemId,
    pub user_id: &'a UserId,
    pub entity: &'a EntityKind,
    pub operation: Operation,
    /// Domain record id for upsert/delete-by-id
    pub record_id: Option<&'a str>,
    /// Decrypted document body
    pub body: &'a Value,
}

/// Remote backend with CRUD semantics per entity type
///
/// Implementations must tolerate duplicate CREATE/UPDATE calls for the same
/// record (upsert semantics) so that a crash between remote success and local
/// removal cannot corrupt remote state.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply a create, update, or delete
    async fn apply(&self, mutation: RemoteMutation<'_>) -> Result<(), RemoteError>;

    /// Fetch all records of an entity type owned by a user
    async fn fetch(
        &self,
        entity: &EntityKind,
        user_id: &UserId,
    ) -> Result<Vec<EntityRecord>, RemoteError>;
}

/// Time abstraction for testability
///
/// Retention windows, escalation timestamps, and notification rate limits
/// all read the time through this trait.
pub trait Clock: Send + Sync {
    /// Get the current UTC datetime
    fn now(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
