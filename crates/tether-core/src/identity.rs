//! User and item identifiers
//!
//! - [`UserId`]: the authenticated user, used to namespace every persisted key
//! - [`ItemId`]: identifier assigned to a queued mutation at enqueue time, also
//!   sent to the backend as the idempotency key

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdentityError;

/// Identifier of the authenticated user
///
/// Supplied by the session layer. Persisted keys embed it so that two
/// accounts on a shared device never read each other's queues.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Maximum accepted length
    pub const MAX_LENGTH: usize = 128;

    /// Create a user id, rejecting values that would break key namespacing
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(IdentityError::Empty("UserId"));
        }
        if id.len() > Self::MAX_LENGTH {
            return Err(IdentityError::InvalidFormat(format!(
                "UserId exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if id.contains('/') || id.chars().any(char::is_control) {
            return Err(IdentityError::InvalidFormat(
                "UserId contains '/' or control characters".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a new random item id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from the canonical hyphenated form
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| IdentityError::InvalidFormat(e.to_string()))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("user-123").is_ok());
        assert!(matches!(UserId::new("  "), Err(IdentityError::Empty(_))));
        assert!(UserId::new("a/b").is_err());
        assert!(UserId::new("x".repeat(200)).is_err());
    }

    #[test]
    fn test_user_id_trims() {
        let id = UserId::new("  alice ").unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_short_id() {
        let id = UserId::new("0123456789abcdef").unwrap();
        assert_eq!(id.short_id(), "01234567");
    }

    #[test]
    fn test_item_id_unique() {
        let a = ItemId::generate();
        let b = ItemId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_item_id_parse() {
        let id = ItemId::generate();
        let parsed = ItemId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(ItemId::parse("not-a-uuid").is_err());
    }
}
