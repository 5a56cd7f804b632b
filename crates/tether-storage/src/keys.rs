//! Persisted key namespaces
//!
//! Every per-user key embeds the [`UserId`], so accounts sharing a device
//! never see each other's data. The device key is device-scoped.

use tether_core::{EntityKind, UserId};

/// Key of the device encryption key record
pub const DEVICE_KEY: &str = "device_key";

const SYNC_QUEUE: &str = "sync_queue";
const DEAD_LETTER: &str = "dead_letter";
const CONFLICTS: &str = "conflicts";
const ENTITY_CACHE: &str = "entity_cache";

/// Pending mutations for a user
pub fn sync_queue(user: &UserId) -> String {
    format!("{SYNC_QUEUE}/{user}")
}

/// Dead-lettered mutations for a user
pub fn dead_letter(user: &UserId) -> String {
    format!("{DEAD_LETTER}/{user}")
}

/// Conflict history for a user
pub fn conflicts(user: &UserId) -> String {
    format!("{CONFLICTS}/{user}")
}

/// Sealed local copy of one entity type for a user
pub fn entity_cache(user: &UserId, entity: &EntityKind) -> String {
    format!("{ENTITY_CACHE}/{user}/{entity}")
}

/// Prefix shared by every entity cache of a user
pub fn entity_cache_prefix(user: &UserId) -> String {
    format!("{ENTITY_CACHE}/{user}/")
}
