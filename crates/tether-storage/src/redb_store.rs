//! redb-backed record store
//!
//! One table holds every namespace: key is the namespaced string, value is
//! the encoded bytes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::RecordStore;
use crate::error::StorageError;

// Key: namespaced key (see `keys`), Value: encoded list or blob
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Configuration for redb storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/tether.redb"),
            cache_size: 8 * 1024 * 1024, // 8MB, mobile budget
        }
    }
}

impl RedbStorageConfig {
    pub fn with_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

/// Durable [`RecordStore`] on a single redb file
///
/// Each `put`/`delete` is its own committed write transaction, so a crash
/// loses at most the write in flight.
pub struct RedbRecordStore {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbRecordStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)
            .map_err(|e| StorageError::database(e.to_string()))?;

        info!("Opened redb database");

        let storage = Self {
            db: Arc::new(db),
            config,
        };
        storage.init_tables()?;

        Ok(storage)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::database(e.to_string()))?;
        write_txn
            .open_table(RECORDS)
            .map_err(|e| StorageError::database(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| StorageError::database(e.to_string()))?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }
}

#[async_trait]
impl RecordStore for RedbRecordStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::database(e.to_string()))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(|e| StorageError::database(e.to_string()))?;

        let value = table
            .get(key)
            .map_err(|e| StorageError::database(e.to_string()))?
            .map(|v| v.value().to_vec());

        Ok(value)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::database(e.to_string()))?;

        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| StorageError::database(e.to_string()))?;
            table
                .insert(key, value)
                .map_err(|e| StorageError::database(e.to_string()))?;
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::database(e.to_string()))?;

        let removed = {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(|e| StorageError::database(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| StorageError::database(e.to_string()))?
                .is_some()
        };

        write_txn
            .commit()
            .map_err(|e| StorageError::database(e.to_string()))?;

        Ok(removed)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::database(e.to_string()))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(|e| StorageError::database(e.to_string()))?;

        let mut results = Vec::new();

        // Keys are ordered, so everything with the prefix is contiguous from `prefix`
        let range = table
            .range(prefix..)
            .map_err(|e| StorageError::database(e.to_string()))?;

        for entry in range {
            let (key, value) = entry.map_err(|e| StorageError::database(e.to_string()))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_string(), value.value().to_vec()));
        }

        Ok(results)
    }
}
