//! # Tether Storage
//!
//! Persisted namespaces for the Tether offline sync layer.
//!
//! Everything the sync engine keeps on the device lives behind one small
//! key-value trait, so the same engine runs on a redb file in production
//! and on a `DashMap` in tests.
//!
//! ## Features
//!
//! - **RecordStore trait**: async key-value abstraction over namespaced string keys
//! - **InMemoryRecordStore**: in-memory implementation for tests and previews
//! - **RedbRecordStore**: single-table redb implementation for production
//! - **ListStore**: serialized read-modify-write of a persisted list
//! - **SealedCache**: per-entity record cache encrypted with the secure store
//! - **RecordKeyStore**: device key persistence for targets without a keychain
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_storage::{InMemoryRecordStore, ListStore, RecordStore, keys};
//!
//! let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
//! let queue: ListStore<SyncQueueItem> = ListStore::new(store, keys::sync_queue(&user));
//! queue.mutate(|items| items.push(item)).await?;
//! ```

pub mod error;
pub mod key_store;
pub mod keys;
pub mod list_store;
pub mod memory;
pub mod redb_store;
pub mod sealed_cache;

// Re-exports
pub use error::StorageError;
pub use key_store::RecordKeyStore;
pub use list_store::ListStore;
pub use memory::InMemoryRecordStore;
pub use redb_store::{RedbRecordStore, RedbStorageConfig};
pub use sealed_cache::SealedCache;

use async_trait::async_trait;

/// Async key-value store the persisted namespaces are built on
///
/// Keys are namespaced strings (see [`keys`]); values are opaque bytes.
/// Implementations must make each `put` and `delete` durable before
/// returning.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the value under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// All entries whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}
