//! Entity kinds, mutation operations, and mergeable records

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Symbolic entity type a mutation or record belongs to
///
/// Serialized as its snake_case name so that persisted queues written by a
/// newer build (with entity types this build does not know) still load.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityKind {
    MoodEntry,
    Compulsion,
    VoiceCheckin,
    UserProfile,
    Other(String),
}

impl EntityKind {
    /// Get the wire/storage name
    pub fn as_str(&self) -> &str {
        match self {
            EntityKind::MoodEntry => "mood_entry",
            EntityKind::Compulsion => "compulsion",
            EntityKind::VoiceCheckin => "voice_checkin",
            EntityKind::UserProfile => "user_profile",
            EntityKind::Other(name) => name,
        }
    }
}

impl From<&str> for EntityKind {
    fn from(name: &str) -> Self {
        match name {
            "mood_entry" => EntityKind::MoodEntry,
            "compulsion" => EntityKind::Compulsion,
            "voice_checkin" => EntityKind::VoiceCheckin,
            "user_profile" => EntityKind::UserProfile,
            other => EntityKind::Other(other.to_string()),
        }
    }
}

impl From<String> for EntityKind {
    fn from(name: String) -> Self {
        EntityKind::from(name.as_str())
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.as_str().to_string()
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mutation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// CREATE and UPDATE are both upserts on the remote contract
    pub fn is_upsert(self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// A user-authored record as seen by the conflict resolver
///
/// `id` and `timestamp` are lifted out; every other field of the domain
/// object lives in `fields`. Domain types convert through serde with
/// [`EntityRecord::from_typed`] and [`EntityRecord::to_typed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create an empty record
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether two copies of the same record differ on anything but the timestamp
    pub fn diverges_from(&self, other: &EntityRecord) -> bool {
        self.id != other.id || self.fields != other.fields
    }

    /// Convert a domain object that serializes with `id` and `timestamp` fields
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, CoreError> {
        Ok(serde_json::from_value(serde_json::to_value(value)?)?)
    }

    /// Convert back into a domain object
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}
