//! Mutation payloads and encrypted blobs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version written into every [`EncryptedBlob`]
pub const BLOB_VERSION: u32 = 1;

/// Ciphertext produced by the secure store
///
/// `algorithm` is kept as the raw tag string rather than an enum so that a
/// blob written by a newer build with an unknown cipher still deserializes;
/// decryption then refuses it instead of the whole queue failing to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Encrypted bytes (including any authentication tag)
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Initialization vector / nonce
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Tag of the cipher that produced this blob
    pub algorithm: String,
    /// Blob schema version
    pub version: u32,
}

impl EncryptedBlob {
    /// Total size of the encrypted material
    pub fn size(&self) -> usize {
        self.ciphertext.len() + self.iv.len()
    }
}

/// Domain data carried by a queued mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Plain JSON document
    Plain(Value),
    /// Sensitive document sealed by the secure store
    Sealed(EncryptedBlob),
}

impl Payload {
    /// Whether the payload is encrypted at rest
    pub fn is_sealed(&self) -> bool {
        matches!(self, Payload::Sealed(_))
    }

    /// Extract the domain record id from a plain payload's `id` field
    ///
    /// Sealed payloads are opaque; callers that seal data capture the id
    /// before encryption.
    pub fn record_id(&self) -> Option<String> {
        match self {
            Payload::Plain(value) => record_id_of(value),
            Payload::Sealed(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Plain(value)
    }
}

impl From<EncryptedBlob> for Payload {
    fn from(blob: EncryptedBlob) -> Self {
        Payload::Sealed(blob)
    }
}

/// Read an `id` field that may be a string or a number
pub fn record_id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
