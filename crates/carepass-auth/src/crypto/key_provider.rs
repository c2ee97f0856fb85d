//! Data key providers.
//!
//! Field encryption never uses a master key directly. A [`KeyProvider`]
//! hands out per-value data keys together with their wrapped form, the way a
//! managed KMS `GenerateDataKey` / `Decrypt` pair does. Data keys are bound
//! to the [`EncryptionContext`] they were generated under.

use std::collections::HashMap;
use std::fmt;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

use super::{CryptoError, EncryptionContext};

/// Size of a data key and of a master key (AES-256).
pub const DATA_KEY_SIZE: usize = 32;

/// Nonce size for AES-256-GCM (96 bits).
pub(crate) const NONCE_SIZE: usize = 12;

/// A freshly generated data key.
pub struct DataKey {
    /// Master key the data key is wrapped under.
    pub key_id: String,
    /// Plaintext key material; lives only for the duration of one seal.
    pub plaintext: [u8; DATA_KEY_SIZE],
    /// Wrapped key, stored alongside the ciphertext.
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("key_id", &self.key_id)
            .field("plaintext", &"[REDACTED]")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// KMS-like source of context-bound data keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generates a new data key under `key_id`, bound to `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the master key is unknown or the provider is
    /// unavailable.
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
    ) -> Result<DataKey, CryptoError>;

    /// Unwraps a data key previously produced by [`generate_data_key`](Self::generate_data_key).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the wrapped key was tampered
    /// with, or `context` differs from the one used at generation.
    async fn decrypt_data_key(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<[u8; DATA_KEY_SIZE], CryptoError>;
}

/// In-process key provider backed by a keyring of AES-256 master keys.
///
/// Wraps data keys with AES-256-GCM using the canonical encryption context as
/// associated data. Suitable for development and tests; production wires a
/// managed key service behind the same trait.
#[derive(Default)]
pub struct LocalKeyProvider {
    keyring: HashMap<String, [u8; DATA_KEY_SIZE]>,
}

impl LocalKeyProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a master key.
    #[must_use]
    pub fn with_key(mut self, key_id: impl Into<String>, key: [u8; DATA_KEY_SIZE]) -> Self {
        self.keyring.insert(key_id.into(), key);
        self
    }

    /// Builds a provider from base64-encoded master keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyMaterial` if any key is not valid base64 or not 32 bytes.
    pub fn from_base64_keys<'a, I>(keys: I) -> Result<Self, CryptoError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut provider = Self::new();
        for (key_id, encoded) in keys {
            let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
                CryptoError::InvalidKeyMaterial(format!("key '{key_id}' is not base64: {e}"))
            })?;
            let key: [u8; DATA_KEY_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| {
                CryptoError::InvalidKeyMaterial(format!(
                    "key '{key_id}' must be {DATA_KEY_SIZE} bytes, got {}",
                    b.len()
                ))
            })?;
            provider.keyring.insert(key_id.clone(), key);
        }
        Ok(provider)
    }

    /// Generates a random master key.
    #[must_use]
    pub fn generate_key() -> [u8; DATA_KEY_SIZE] {
        let mut key = [0u8; DATA_KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    /// Returns `true` if the provider knows `key_id`.
    #[must_use]
    pub fn has_key(&self, key_id: &str) -> bool {
        self.keyring.contains_key(key_id)
    }

    fn cipher(&self, key_id: &str) -> Result<Aes256Gcm, CryptoError> {
        let master = self
            .keyring
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;
        Aes256Gcm::new_from_slice(master)
            .map_err(|e| CryptoError::KeyProvider(format!("Failed to create cipher: {e}")))
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
    ) -> Result<DataKey, CryptoError> {
        let cipher = self.cipher(key_id)?;
        let plaintext = Self::generate_key();

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let aad = context.canonical_bytes();

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::KeyProvider(format!("Failed to wrap data key: {e}")))?;

        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&sealed);

        Ok(DataKey {
            key_id: key_id.to_string(),
            plaintext,
            ciphertext,
        })
    }

    async fn decrypt_data_key(
        &self,
        key_id: &str,
        ciphertext: &[u8],
        context: &EncryptionContext,
    ) -> Result<[u8; DATA_KEY_SIZE], CryptoError> {
        if ciphertext.len() <= NONCE_SIZE {
            return Err(CryptoError::Decryption("wrapped key too short".to_string()));
        }
        let cipher = self.cipher(key_id)?;
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        let aad = context.canonical_bytes();

        let opened = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Decryption("data key could not be unwrapped".to_string()))?;

        opened
            .try_into()
            .map_err(|_| CryptoError::Decryption("unwrapped key has wrong size".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> EncryptionContext {
        EncryptionContext::new()
            .with("user_id", "u-1")
            .with("data_type", "user_pii")
    }

    #[tokio::test]
    async fn test_wrap_unwrap_data_key() {
        let provider = LocalKeyProvider::new().with_key("k1", LocalKeyProvider::generate_key());
        let key = provider.generate_data_key("k1", &context()).await.unwrap();
        let unwrapped = provider
            .decrypt_data_key("k1", &key.ciphertext, &context())
            .await
            .unwrap();
        assert_eq!(unwrapped, key.plaintext);
    }

    #[tokio::test]
    async fn test_unwrap_with_other_context_fails() {
        let provider = LocalKeyProvider::new().with_key("k1", LocalKeyProvider::generate_key());
        let key = provider.generate_data_key("k1", &context()).await.unwrap();
        let other = EncryptionContext::new().with("user_id", "u-2");
        let err = provider
            .decrypt_data_key("k1", &key.ciphertext, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let provider = LocalKeyProvider::new();
        let err = provider
            .generate_data_key("missing", &context())
            .await
            .unwrap_err();
        assert_eq!(err, CryptoError::UnknownKey("missing".to_string()));
        assert!(err.is_key_error());
    }

    #[test]
    fn test_from_base64_keys() {
        let mut keys = HashMap::new();
        keys.insert("k1".to_string(), BASE64.encode([7u8; 32]));
        let provider = LocalKeyProvider::from_base64_keys(&keys).unwrap();
        assert!(provider.has_key("k1"));

        let mut bad = HashMap::new();
        bad.insert("short".to_string(), BASE64.encode([7u8; 16]));
        assert!(matches!(
            LocalKeyProvider::from_base64_keys(&bad),
            Err(CryptoError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_data_key_debug_redacts() {
        let key = DataKey {
            key_id: "k1".to_string(),
            plaintext: [1u8; 32],
            ciphertext: vec![0u8; 60],
        };
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("[1, 1"));
    }
}
