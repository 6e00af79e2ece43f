// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-rotated encryption of secret columns.
//!
//! A [`KeyChain`] holds an ordered list of 256-bit keys: the first key seals
//! new values, decryption tries every key in order. Rotating a key is
//! therefore zero-downtime: prepend the new key, keep the old one until every
//! row has been rewritten.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Environment variable holding the `;`-joined base64 key list.
pub const ENCRYPT_KEYS_ENV: &str = "GRIDWAY_ENCRYPT_KEYS";

/// AES-256-GCM nonce length in bytes, prepended to every ciphertext.
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("invalid encryption key (expected 32 base64-encoded bytes), check {ENCRYPT_KEYS_ENV}")]
    InvalidKey,

    #[error("no encryption key configured, set {ENCRYPT_KEYS_ENV}")]
    NoKeys,

    #[error("value could not be decrypted with any configured key")]
    DecryptFailed,

    #[error("ciphertext too short")]
    Truncated,

    #[error("encryption failed")]
    EncryptFailed,
}

/// A single 256-bit encryption key.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_base64(encoded: &str) -> Result<Self, SecretsError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| SecretsError::InvalidKey)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| SecretsError::InvalidKey)?;
        Ok(Self(bytes))
    }

    /// Mint a fresh random key (tooling and tests).
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Ordered list of encryption keys; may be empty only for volatile stores.
#[derive(Debug, Clone, Default)]
pub struct KeyChain {
    keys: Vec<EncryptionKey>,
}

impl KeyChain {
    pub fn new(keys: Vec<EncryptionKey>) -> Self {
        Self { keys }
    }

    /// Parse a `;`-joined base64 key list, e.g. the value of
    /// [`ENCRYPT_KEYS_ENV`]. Empty segments are rejected.
    pub fn parse(joined: &str) -> Result<Self, SecretsError> {
        let mut keys = Vec::new();
        for segment in joined.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(SecretsError::InvalidKey);
            }
            keys.push(EncryptionKey::from_base64(segment)?);
        }
        Ok(Self { keys })
    }

    /// Read the key list from [`ENCRYPT_KEYS_ENV`]; absent means empty.
    pub fn from_env() -> Result<Self, SecretsError> {
        match std::env::var(ENCRYPT_KEYS_ENV) {
            Ok(value) if !value.is_empty() => Self::parse(&value),
            _ => Ok(Self::default()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seal with the first key. Layout: `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, SecretsError> {
        let key = self.keys.first().ok_or(SecretsError::NoKeys)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = key
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|_| SecretsError::EncryptFailed)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open with the first key that authenticates.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, SecretsError> {
        if self.keys.is_empty() {
            return Err(SecretsError::NoKeys);
        }
        if sealed.len() < NONCE_LEN {
            return Err(SecretsError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);
        for key in &self.keys {
            if let Ok(plaintext) = key.cipher().decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }
        Err(SecretsError::DecryptFailed)
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
