//! Data-encryption keys and the provider that resolves them.
//!
//! This is the only module in the crate that imports an AEAD primitive
//! directly. The processors perform encryption and decryption
//! exclusively through the [`DataEncryptionKey`] handle, which hides
//! the primitive behind two guarantees:
//!
//! 1. ciphertext length is a deterministic function of plaintext
//!    length, and
//! 2. decryption is authenticated and fails loudly with
//!    [`Error::AuthFailed`] on a tag mismatch.
//!
//! The bundled implementation is AES-256-GCM with a fresh random nonce
//! per operation, laid out as `[nonce(12)][ciphertext + tag(16)]`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::options::EncryptionAlgorithm;

/// Size of a data-encryption key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Handle to a data-encryption key fetched from a [`KeyProvider`].
///
/// A handle lives for at most one encrypt/decrypt call; the codec
/// fetches it lazily once per call and drops it at call end.
pub trait DataEncryptionKey: Send + Sync {
    /// Ciphertext length for a given plaintext length. Deterministic.
    fn ciphertext_length(&self, plaintext_len: usize) -> usize;

    /// Plaintext length for a given ciphertext length. Fails if the
    /// ciphertext cannot even hold the fixed overhead.
    fn plaintext_length(&self, ciphertext_len: usize) -> Result<usize>;

    /// Encrypt `plaintext` into `out`, returning the number of bytes
    /// written. `out` is the caller's buffer sliced at the desired
    /// output offset and must hold at least
    /// `ciphertext_length(plaintext.len())` bytes.
    fn encrypt(&self, plaintext: &[u8], out: &mut [u8]) -> Result<usize>;

    /// Decrypt `ciphertext` into `out`, returning the number of bytes
    /// written. Fails with [`Error::AuthFailed`] if authentication
    /// fails.
    fn decrypt(&self, ciphertext: &[u8], out: &mut [u8]) -> Result<usize>;
}

/// Resolves data-encryption keys by id. Shared across calls and safe
/// for concurrent use.
pub trait KeyProvider: Send + Sync {
    /// Fetch the key for `key_id`. Fails with [`Error::KeyUnknown`] if
    /// the provider has no such key.
    fn get_key(
        &self,
        key_id: &str,
        algorithm: EncryptionAlgorithm,
    ) -> Result<Arc<dyn DataEncryptionKey>>;
}

/// An AES-256-GCM data-encryption key.
pub struct Aes256GcmKey {
    cipher: Aes256Gcm,
}

impl Aes256GcmKey {
    /// Build a key from raw key material.
    pub fn new(key_bytes: &[u8; KEY_LEN]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes));
        Self { cipher }
    }

    /// Generate a key from fresh random material.
    pub fn generate() -> Self {
        let mut key_bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key_bytes);
        Self::new(&key_bytes)
    }
}

impl DataEncryptionKey for Aes256GcmKey {
    fn ciphertext_length(&self, plaintext_len: usize) -> usize {
        NONCE_LEN + plaintext_len + TAG_LEN
    }

    fn plaintext_length(&self, ciphertext_len: usize) -> Result<usize> {
        ciphertext_len
            .checked_sub(NONCE_LEN + TAG_LEN)
            .ok_or(Error::LengthTooShort {
                step: "size ciphertext",
                actual: ciphertext_len,
                expected: NONCE_LEN + TAG_LEN,
            })
    }

    fn encrypt(&self, plaintext: &[u8], out: &mut [u8]) -> Result<usize> {
        let needed = self.ciphertext_length(plaintext.len());
        if out.len() < needed {
            return Err(Error::Internal(format!(
                "ciphertext buffer holds {} bytes, need {}",
                out.len(),
                needed
            )));
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::Internal("AEAD encryption failure".to_string()))?;
        out[..NONCE_LEN].copy_from_slice(&nonce_bytes);
        out[NONCE_LEN..needed].copy_from_slice(&sealed);
        Ok(needed)
    }

    fn decrypt(&self, ciphertext: &[u8], out: &mut [u8]) -> Result<usize> {
        let plain_len = self.plaintext_length(ciphertext.len())?;
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| Error::AuthFailed)?;
        if out.len() < plain.len() {
            return Err(Error::Internal(format!(
                "plaintext buffer holds {} bytes, need {}",
                out.len(),
                plain.len()
            )));
        }
        out[..plain.len()].copy_from_slice(&plain);
        debug_assert_eq!(plain.len(), plain_len);
        Ok(plain.len())
    }
}

/// An in-memory key registry, id → AES-256-GCM key.
///
/// Suitable for tests and for callers that manage raw key material
/// themselves; production deployments typically implement
/// [`KeyProvider`] against an external key-management service instead.
#[derive(Default)]
pub struct MemoryKeyProvider {
    keys: RwLock<HashMap<String, Arc<Aes256GcmKey>>>,
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key under `key_id`, replacing any previous one.
    pub fn add_key(&self, key_id: impl Into<String>, key_bytes: &[u8; KEY_LEN]) {
        self.keys
            .write()
            .expect("key registry lock poisoned")
            .insert(key_id.into(), Arc::new(Aes256GcmKey::new(key_bytes)));
    }

    /// Generate and register a fresh random key under `key_id`.
    pub fn generate_key(&self, key_id: impl Into<String>) {
        self.keys
            .write()
            .expect("key registry lock poisoned")
            .insert(key_id.into(), Arc::new(Aes256GcmKey::generate()));
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn get_key(
        &self,
        key_id: &str,
        _algorithm: EncryptionAlgorithm,
    ) -> Result<Arc<dyn DataEncryptionKey>> {
        self.keys
            .read()
            .expect("key registry lock poisoned")
            .get(key_id)
            .cloned()
            .map(|key| key as Arc<dyn DataEncryptionKey>)
            .ok_or_else(|| Error::KeyUnknown(key_id.to_string()))
    }
}
