//! Cipher algorithm tags and their security levels

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// How much protection a blob produced by an algorithm actually gives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Not an encryption at all (one-way fingerprint)
    NotEncryption,
    /// Readable by anyone with the blob
    Insecure,
    /// Keyed and authenticated, but not a vetted AEAD construction
    Weak,
    /// Standard AEAD
    Strong,
}

/// Cipher identifiers stored in [`tether_core::EncryptedBlob::algorithm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Algorithm {
    ChaCha20Poly1305,
    Aes256Gcm,
    /// BLAKE3 keyed keystream with a keyed BLAKE3 MAC
    Blake3Stream,
    /// Plaintext copy, for development builds only
    DevEncoding,
    /// Legacy fingerprint tag; never produced or decrypted
    Sha256HashOnly,
}

impl Algorithm {
    /// Ciphers `encrypt` may try, in preference order
    pub const CHAIN: [Algorithm; 4] = [
        Algorithm::ChaCha20Poly1305,
        Algorithm::Aes256Gcm,
        Algorithm::Blake3Stream,
        Algorithm::DevEncoding,
    ];

    /// Tag written into blobs
    pub fn tag(self) -> &'static str {
        match self {
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::Blake3Stream => "blake3-stream",
            Algorithm::DevEncoding => "dev-encoding",
            Algorithm::Sha256HashOnly => "sha256",
        }
    }

    pub fn security_level(self) -> SecurityLevel {
        match self {
            Algorithm::ChaCha20Poly1305 | Algorithm::Aes256Gcm => SecurityLevel::Strong,
            Algorithm::Blake3Stream => SecurityLevel::Weak,
            Algorithm::DevEncoding => SecurityLevel::Insecure,
            Algorithm::Sha256HashOnly => SecurityLevel::NotEncryption,
        }
    }

    /// Whether blobs tagged with this algorithm can be decrypted at all
    pub fn is_reversible(self) -> bool {
        self != Algorithm::Sha256HashOnly
    }

    /// Nonce length written into `EncryptedBlob::iv`
    pub fn nonce_len(self) -> usize {
        match self {
            Algorithm::ChaCha20Poly1305 | Algorithm::Aes256Gcm => 12,
            Algorithm::Blake3Stream => 24,
            Algorithm::DevEncoding | Algorithm::Sha256HashOnly => 0,
        }
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "chacha20-poly1305" => Ok(Algorithm::ChaCha20Poly1305),
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            "blake3-stream" => Ok(Algorithm::Blake3Stream),
            "dev-encoding" => Ok(Algorithm::DevEncoding),
            "sha256" => Ok(Algorithm::Sha256HashOnly),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = CryptoError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<Algorithm> for String {
    fn from(algorithm: Algorithm) -> Self {
        algorithm.tag().to_string()
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
