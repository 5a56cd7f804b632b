//! # Tether Crypto
//!
//! Encrypted-at-rest storage primitive for Tether.
//!
//! Sensitive domain objects (voice check-ins, compulsion logs) are sealed
//! with a per-device key before they reach the sync queue or the entity
//! cache.
//!
//! ## Features
//!
//! - ChaCha20-Poly1305 authenticated encryption, with AES-256-GCM as the
//!   alternative strong cipher
//! - Opt-in BLAKE3 keyed-stream fallback for platforms without an AEAD
//! - Plaintext dev encoding behind the `insecure-dev-cipher` cargo feature
//! - Device key generated once, persisted through a [`KeyStore`], zeroized on drop
//!
//! ## Key Types
//!
//! - [`SecureStore`]: encrypts and decrypts serde values
//! - [`Algorithm`]: cipher tag stored in every blob
//! - [`SecurityLevel`]: how much protection a given algorithm gives
//! - [`DeviceKey`]: the per-device symmetric key
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_crypto::{MemoryKeyStore, SecureStore, SecureStoreConfig};
//!
//! let store = SecureStore::new(SecureStoreConfig::default(), Arc::new(MemoryKeyStore::new()));
//! let blob = store.encrypt(&serde_json::json!({"mood": 40})).await?;
//! let back: serde_json::Value = store.decrypt(&blob).await?;
//! ```

pub mod algorithm;
pub mod cipher;
pub mod error;
pub mod key;
pub mod secure_store;

// Re-exports
pub use algorithm::{Algorithm, SecurityLevel};
pub use cipher::fingerprint;
pub use error::{CryptoError, CryptoResult};
pub use key::{DeviceKey, KEY_SIZE, KeyStore, MemoryKeyStore};
pub use secure_store::{SecureStore, SecureStoreConfig};
