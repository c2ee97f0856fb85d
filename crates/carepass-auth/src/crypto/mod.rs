//! PII protection: envelope encryption and searchable hashes.
//!
//! - [`CryptoEnvelope`] - per-field AES-256-GCM encryption with context binding
//! - [`KeyProvider`] - KMS-like data key source ([`LocalKeyProvider`] in-process)
//! - [`hash_email`] / [`hash_for_index`] - deterministic lookup hashes

pub mod envelope;
pub mod error;
pub mod hashing;
pub mod key_provider;

pub use envelope::{CryptoEnvelope, EncryptedValue, EncryptionContext, FieldRecord};
pub use error::CryptoError;
pub use hashing::{hash_email, hash_for_index, normalize_email};
pub use key_provider::{DATA_KEY_SIZE, DataKey, KeyProvider, LocalKeyProvider};
