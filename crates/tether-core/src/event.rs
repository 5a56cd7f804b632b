//! Invalidation events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::identity::UserId;

/// Events announced on the invalidation bus
///
/// Publishers only state what changed; they never know which caches exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    /// A processing pass delivered at least one item for each listed entity type
    SyncCompleted {
        entities: Vec<EntityKind>,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },

    /// Remote state was merged into local state for an entity type
    EntityMerged {
        entity: EntityKind,
        user_id: UserId,
        conflicts: usize,
        timestamp: DateTime<Utc>,
    },

    /// Domain-specific cache busting for AI-derived data
    AiInvalidation {
        hook: String,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Get the kind of this event (used for subscription routing)
    pub fn kind(&self) -> SyncEventKind {
        match self {
            Self::SyncCompleted { .. } => SyncEventKind::SyncCompleted,
            Self::EntityMerged { .. } => SyncEventKind::EntityMerged,
            Self::AiInvalidation { .. } => SyncEventKind::AiInvalidation,
        }
    }

    /// Get the user this event concerns
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::SyncCompleted { user_id, .. } => user_id,
            Self::EntityMerged { user_id, .. } => user_id,
            Self::AiInvalidation { user_id, .. } => user_id,
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SyncCompleted { timestamp, .. } => *timestamp,
            Self::EntityMerged { timestamp, .. } => *timestamp,
            Self::AiInvalidation { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this event concerns the given entity type
    pub fn touches(&self, entity: &EntityKind) -> bool {
        match self {
            Self::SyncCompleted { entities, .. } => entities.contains(entity),
            Self::EntityMerged { entity: e, .. } => e == entity,
            Self::AiInvalidation { .. } => false,
        }
    }

    /// Create a sync completed event
    pub fn sync_completed(entities: Vec<EntityKind>, user_id: UserId) -> Self {
        Self::SyncCompleted {
            entities,
            user_id,
            timestamp: Utc::now(),
        }
    }

    /// Create an entity merged event
    pub fn entity_merged(entity: EntityKind, user_id: UserId, conflicts: usize) -> Self {
        Self::EntityMerged {
            entity,
            user_id,
            conflicts,
            timestamp: Utc::now(),
        }
    }

    /// Create an AI invalidation event
    pub fn ai_invalidation(hook: impl Into<String>, user_id: UserId) -> Self {
        Self::AiInvalidation {
            hook: hook.into(),
            user_id,
            timestamp: Utc::now(),
        }
    }
}

/// Discriminant of [`SyncEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncEventKind {
    SyncCompleted,
    EntityMerged,
    AiInvalidation,
}

impl SyncEventKind {
    /// Event name as used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SyncCompleted => "sync:completed",
            Self::EntityMerged => "sync:merged",
            Self::AiInvalidation => "ai:invalidation",
        }
    }
}

impl std::fmt::Display for SyncEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
