//! Cipher implementations behind each [`Algorithm`] tag
//!
//! Each branch takes the 256-bit device key and returns `(ciphertext, iv)`.
//! AEAD ciphertexts carry their authentication tag; the BLAKE3 stream
//! appends a 32-byte keyed MAC.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    ChaCha20Poly1305,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::algorithm::Algorithm;
use crate::error::{CryptoError, CryptoResult};
use crate::key::KEY_SIZE;

/// Length of the keyed MAC appended by the BLAKE3 stream cipher
const BLAKE3_MAC_SIZE: usize = 32;

const BLAKE3_ENC_CONTEXT: &str = "tether 2024-05 blake3-stream encryption";
const BLAKE3_MAC_CONTEXT: &str = "tether 2024-05 blake3-stream authentication";

/// Encrypt `plaintext` with the given algorithm
pub fn seal(
    algorithm: Algorithm,
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
) -> CryptoResult<(Vec<u8>, Vec<u8>)> {
    match algorithm {
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            let iv = random_nonce(algorithm.nonce_len());
            let nonce = chacha20poly1305::Nonce::from_slice(&iv);
            let ciphertext = cipher
                .encrypt(nonce, plaintext)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            Ok((ciphertext, iv))
        }
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            let iv = random_nonce(algorithm.nonce_len());
            let nonce = aes_gcm::Nonce::from_slice(&iv);
            let ciphertext = cipher
                .encrypt(nonce, plaintext)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            Ok((ciphertext, iv))
        }
        Algorithm::Blake3Stream => {
            let iv = random_nonce(algorithm.nonce_len());
            let mut ciphertext = plaintext.to_vec();
            apply_keystream(key, &iv, &mut ciphertext);
            let mac = blake3_mac(key, &iv, &ciphertext);
            ciphertext.extend_from_slice(mac.as_bytes());
            Ok((ciphertext, iv))
        }
        #[cfg(feature = "insecure-dev-cipher")]
        Algorithm::DevEncoding => Ok((plaintext.to_vec(), Vec::new())),
        #[cfg(not(feature = "insecure-dev-cipher"))]
        Algorithm::DevEncoding => Err(CryptoError::UnsupportedAlgorithm(
            algorithm.tag().to_string(),
        )),
        Algorithm::Sha256HashOnly => Err(CryptoError::HashOnlyAlgorithm(
            algorithm.tag().to_string(),
        )),
    }
}

/// Decrypt a ciphertext produced by [`seal`]
pub fn open(
    algorithm: Algorithm,
    key: &[u8; KEY_SIZE],
    ciphertext: &[u8],
    iv: &[u8],
) -> CryptoResult<Vec<u8>> {
    if iv.len() != algorithm.nonce_len() {
        return Err(CryptoError::DecryptionFailed(format!(
            "{} expects a {}-byte nonce, got {}",
            algorithm,
            algorithm.nonce_len(),
            iv.len()
        )));
    }

    match algorithm {
        Algorithm::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(iv), ciphertext)
                .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
        }
        Algorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(iv), ciphertext)
                .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
        }
        Algorithm::Blake3Stream => {
            if ciphertext.len() < BLAKE3_MAC_SIZE {
                return Err(CryptoError::DataTooShort {
                    expected: BLAKE3_MAC_SIZE,
                    actual: ciphertext.len(),
                });
            }
            let (body, tag) = ciphertext.split_at(ciphertext.len() - BLAKE3_MAC_SIZE);
            let mut expected = [0u8; BLAKE3_MAC_SIZE];
            expected.copy_from_slice(tag);

            // blake3::Hash equality is constant-time
            if blake3_mac(key, iv, body) != blake3::Hash::from(expected) {
                return Err(CryptoError::DecryptionFailed(
                    "authentication tag mismatch".to_string(),
                ));
            }

            let mut plaintext = body.to_vec();
            apply_keystream(key, iv, &mut plaintext);
            Ok(plaintext)
        }
        #[cfg(feature = "insecure-dev-cipher")]
        Algorithm::DevEncoding => Ok(ciphertext.to_vec()),
        #[cfg(not(feature = "insecure-dev-cipher"))]
        Algorithm::DevEncoding => Err(CryptoError::UnsupportedAlgorithm(
            algorithm.tag().to_string(),
        )),
        Algorithm::Sha256HashOnly => Err(CryptoError::HashOnlyAlgorithm(
            algorithm.tag().to_string(),
        )),
    }
}

/// Hex SHA-256 fingerprint, the format of legacy `sha256` tagged values
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn random_nonce(len: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; len];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn apply_keystream(key: &[u8; KEY_SIZE], nonce: &[u8], data: &mut [u8]) {
    let enc_key = blake3::derive_key(BLAKE3_ENC_CONTEXT, key);
    let mut keystream = vec![0u8; data.len()];
    blake3::Hasher::new_keyed(&enc_key)
        .update(nonce)
        .finalize_xof()
        .fill(&mut keystream);
    for (byte, k) in data.iter_mut().zip(keystream) {
        *byte ^= k;
    }
}

fn blake3_mac(key: &[u8; KEY_SIZE], nonce: &[u8], ciphertext: &[u8]) -> blake3::Hash {
    let mac_key = blake3::derive_key(BLAKE3_MAC_CONTEXT, key);
    blake3::Hasher::new_keyed(&mac_key)
        .update(nonce)
        .update(ciphertext)
        .finalize()
}
