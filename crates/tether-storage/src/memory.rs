//! In-memory storage implementation
//!
//! Suitable for tests, previews, and platforms without a writable data
//! directory. Nothing survives a restart.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::RecordStore;
use crate::error::StorageError;

/// In-memory implementation of [`RecordStore`]
///
/// Uses `DashMap` for concurrent access. Writes can be made to fail on
/// demand to exercise best-effort persistence paths.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<String, Vec<u8>>,
    fail_writes: AtomicBool,
}

impl InMemoryRecordStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` and `delete` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_writable(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(format!("write to {key} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check_writable(key)?;
        trace!(key, bytes = value.len(), "put");
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check_writable(key)?;
        Ok(self.records.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut results: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}
