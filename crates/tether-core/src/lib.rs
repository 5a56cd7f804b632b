//! # Tether Core
//!
//! Core traits, types, and errors for the Tether offline sync layer.
//!
//! This crate provides the shared vocabulary used by the secure store,
//! the persisted namespaces, and the sync engine, so that the same queue
//! and merge logic works against a real backend or an in-memory fake.
//!
//! ## Key Traits
//!
//! - [`RemoteBackend`]: CRUD-style remote collaborator, one operation per entity type
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`SyncQueueItem`]: A pending local mutation awaiting delivery
//! - [`DeadLetterItem`]: A mutation the processor gave up on
//! - [`ConflictRecord`]: Audit entry for one merge pass with divergent rows
//! - [`EntityRecord`]: The unit the conflict resolver merges
//! - [`EncryptedBlob`]: Ciphertext produced by the secure store
//! - [`SyncEvent`]: Typed invalidation events

pub mod entity;
pub mod error;
pub mod event;
pub mod identity;
pub mod mock_backend;
pub mod payload;
pub mod record;
pub mod traits;

// Re-export main types
pub use entity::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use mock_backend::*;
pub use payload::*;
pub use record::*;
pub use traits::*;
