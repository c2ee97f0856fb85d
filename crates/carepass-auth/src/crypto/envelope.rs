//! Field-level envelope encryption.
//!
//! Each field value is sealed independently with AES-256-GCM under its own
//! data key. The associated data is the canonical encryption context followed
//! by the field name, so a ciphertext cannot be replayed into another user's
//! record or another column.
//!
//! Stored form:
//!
//! ```text
//! enc.v1.<key_id>.<wrapped_key>.<nonce>.<ciphertext>
//! ```
//!
//! with every segment base64url (no padding).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde_json::Value;

use super::key_provider::NONCE_SIZE;
use super::{CryptoError, KeyProvider};

/// A JSON object whose selected fields are encrypted in place.
pub type FieldRecord = serde_json::Map<String, Value>;

const ENVELOPE_PREFIX: &str = "enc.v1.";

// ============================================================================
// Encryption Context
// ============================================================================

/// Key/value pairs a ciphertext is cryptographically bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionContext {
    entries: BTreeMap<String, String>,
}

impl EncryptionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Context for a user's data of the given type (`user_pii`, `consent`).
    #[must_use]
    pub fn for_user(user_id: impl fmt::Display, data_type: &str) -> Self {
        Self::new()
            .with("user_id", user_id.to_string())
            .with("data_type", data_type)
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Deterministic byte encoding: entries in key order, each component
    /// length-prefixed (u32 big-endian).
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in &self.entries {
            for part in [key, value] {
                out.extend_from_slice(&(part.len() as u32).to_be_bytes());
                out.extend_from_slice(part.as_bytes());
            }
        }
        out
    }
}

// ============================================================================
// Encrypted Value
// ============================================================================

/// Parsed envelope of a single encrypted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    /// Master key the data key is wrapped under.
    pub key_id: String,
    /// Wrapped data key.
    pub wrapped_key: Vec<u8>,
    /// AES-GCM nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with authentication tag.
    pub ciphertext: Vec<u8>,
}

impl EncryptedValue {
    /// Returns `true` if `value` looks like a stored envelope.
    #[must_use]
    pub fn is_envelope(value: &str) -> bool {
        value.starts_with(ENVELOPE_PREFIX)
    }
}

impl fmt::Display for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ENVELOPE_PREFIX}{}.{}.{}.{}",
            URL_SAFE_NO_PAD.encode(self.key_id.as_bytes()),
            URL_SAFE_NO_PAD.encode(&self.wrapped_key),
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext),
        )
    }
}

impl FromStr for EncryptedValue {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| CryptoError::MalformedEnvelope("missing version prefix".to_string()))?;

        let parts: Vec<&str> = body.split('.').collect();
        let [key_id, wrapped_key, nonce, ciphertext] = parts[..] else {
            return Err(CryptoError::MalformedEnvelope(format!(
                "expected 4 segments, got {}",
                parts.len()
            )));
        };

        let decode = |segment: &str, name: &str| {
            URL_SAFE_NO_PAD
                .decode(segment)
                .map_err(|e| CryptoError::MalformedEnvelope(format!("invalid {name}: {e}")))
        };

        let key_id = String::from_utf8(decode(key_id, "key id")?)
            .map_err(|_| CryptoError::MalformedEnvelope("key id is not UTF-8".to_string()))?;
        let nonce: [u8; NONCE_SIZE] = decode(nonce, "nonce")?
            .try_into()
            .map_err(|_| CryptoError::MalformedEnvelope("invalid nonce size".to_string()))?;

        Ok(Self {
            key_id,
            wrapped_key: decode(wrapped_key, "wrapped key")?,
            nonce,
            ciphertext: decode(ciphertext, "ciphertext")?,
        })
    }
}

// ============================================================================
// Crypto Envelope
// ============================================================================

/// Encrypts and decrypts PII fields through a [`KeyProvider`].
pub struct CryptoEnvelope {
    provider: Arc<dyn KeyProvider>,
    default_key_id: String,
}

impl CryptoEnvelope {
    /// Creates an envelope that encrypts new values under `default_key_id`.
    #[must_use]
    pub fn new(provider: Arc<dyn KeyProvider>, default_key_id: impl Into<String>) -> Self {
        Self {
            provider,
            default_key_id: default_key_id.into(),
        }
    }

    /// Key ID used for new encryptions.
    #[must_use]
    pub fn default_key_id(&self) -> &str {
        &self.default_key_id
    }

    /// Encrypts a single value for `field`.
    ///
    /// # Errors
    ///
    /// Returns an error if a data key cannot be generated or sealing fails.
    pub async fn encrypt_value(
        &self,
        plaintext: &str,
        field: &str,
        key_id: &str,
        context: &EncryptionContext,
    ) -> Result<String, CryptoError> {
        let data_key = self.provider.generate_data_key(key_id, context).await?;
        let cipher = Aes256Gcm::new_from_slice(&data_key.plaintext)
            .map_err(|e| CryptoError::Encryption(format!("Failed to create cipher: {e}")))?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let aad = field_aad(context, field);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(EncryptedValue {
            key_id: data_key.key_id,
            wrapped_key: data_key.ciphertext,
            nonce,
            ciphertext,
        }
        .to_string())
    }

    /// Decrypts a single stored value for `field`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an envelope, the context or field
    /// differs from the one used at encryption, or the data was tampered with.
    pub async fn decrypt_value(
        &self,
        stored: &str,
        field: &str,
        context: &EncryptionContext,
    ) -> Result<String, CryptoError> {
        let envelope: EncryptedValue = stored.parse()?;
        let data_key = self
            .provider
            .decrypt_data_key(&envelope.key_id, &envelope.wrapped_key, context)
            .await?;
        let cipher = Aes256Gcm::new_from_slice(&data_key)
            .map_err(|e| CryptoError::Decryption(format!("Failed to create cipher: {e}")))?;
        let aad = field_aad(context, field);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::Decryption(format!("field '{field}' failed authentication")))?;

        String::from_utf8(plaintext)
            .map_err(|_| CryptoError::Decryption(format!("field '{field}' is not UTF-8")))
    }

    /// Encrypts the named string fields of `record` in place.
    ///
    /// Missing and `null` fields are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedFieldType` if a named field holds a non-string
    /// value, or any encryption error. A failure aborts the whole record.
    pub async fn encrypt_fields(
        &self,
        mut record: FieldRecord,
        fields: &[&str],
        key_id: &str,
        context: &EncryptionContext,
    ) -> Result<FieldRecord, CryptoError> {
        for &field in fields {
            let Some(value) = record.get(field) else {
                continue;
            };
            let sealed = match value {
                Value::Null => continue,
                Value::String(plaintext) => {
                    self.encrypt_value(plaintext, field, key_id, context).await?
                }
                _ => {
                    return Err(CryptoError::UnsupportedFieldType {
                        field: field.to_string(),
                    });
                }
            };
            record.insert(field.to_string(), Value::String(sealed));
        }
        Ok(record)
    }

    /// Decrypts the named fields of `record` in place.
    ///
    /// # Errors
    ///
    /// Fails closed: any field that is not a valid envelope for `context`
    /// aborts the whole record.
    pub async fn decrypt_fields(
        &self,
        mut record: FieldRecord,
        fields: &[&str],
        context: &EncryptionContext,
    ) -> Result<FieldRecord, CryptoError> {
        for &field in fields {
            let Some(value) = record.get(field) else {
                continue;
            };
            let opened = match value {
                Value::Null => continue,
                Value::String(stored) => self.decrypt_value(stored, field, context).await?,
                _ => {
                    return Err(CryptoError::UnsupportedFieldType {
                        field: field.to_string(),
                    });
                }
            };
            record.insert(field.to_string(), Value::String(opened));
        }
        Ok(record)
    }

    /// Encrypts an optional value under the default key.
    ///
    /// # Errors
    ///
    /// Returns any encryption error.
    pub async fn encrypt_optional(
        &self,
        plaintext: Option<&str>,
        field: &str,
        context: &EncryptionContext,
    ) -> Result<Option<String>, CryptoError> {
        match plaintext {
            Some(value) => Ok(Some(
                self.encrypt_value(value, field, &self.default_key_id, context)
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Decrypts an optional stored value.
    ///
    /// # Errors
    ///
    /// Returns any decryption error.
    pub async fn decrypt_optional(
        &self,
        stored: Option<&str>,
        field: &str,
        context: &EncryptionContext,
    ) -> Result<Option<String>, CryptoError> {
        match stored {
            Some(value) => Ok(Some(self.decrypt_value(value, field, context).await?)),
            None => Ok(None),
        }
    }
}

fn field_aad(context: &EncryptionContext, field: &str) -> Vec<u8> {
    let mut aad = context.canonical_bytes();
    aad.push(0);
    aad.extend_from_slice(field.as_bytes());
    aad
}
