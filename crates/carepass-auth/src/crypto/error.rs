//! Field encryption errors.

/// Errors that can occur while encrypting, decrypting or wrapping keys.
///
/// Every variant is fatal to the enclosing read or write; callers must not
/// fall back to plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The key provider could not generate or unwrap a data key.
    #[error("Key provider error: {0}")]
    KeyProvider(String),

    /// The requested master key is not known to the key provider.
    #[error("Unknown key: {0}")]
    UnknownKey(String),

    /// Sealing a value failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Opening a value failed (wrong key, wrong context or tampered data).
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// A stored value is not a recognised envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A field selected for encryption holds a non-string value.
    #[error("Field '{field}' must be a string to be encrypted")]
    UnsupportedFieldType {
        /// Name of the offending field.
        field: String,
    },

    /// Configured key material is invalid.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

impl CryptoError {
    /// Returns `true` if the error came from the key provider.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::KeyProvider(_) | Self::UnknownKey(_) | Self::InvalidKeyMaterial(_)
        )
    }
}
