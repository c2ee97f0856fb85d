//! Deterministic hashes for indexed lookup of encrypted fields.
//!
//! Encrypted columns cannot be searched, so a keyless SHA-256 over a fixed
//! domain separator and the value is stored next to them. The separators keep
//! an e-mail hash from ever equalling an index hash of the same bytes.

use sha2::{Digest, Sha256};

const INDEX_DOMAIN: &[u8] = b"carepass:index:v1";
const EMAIL_DOMAIN: &[u8] = b"carepass:email:v1";

/// Hashes a value exactly as given (case-sensitive).
///
/// Used for identifiers such as `external_subscription_id_hash`.
#[must_use]
pub fn hash_for_index(value: &str) -> String {
    domain_hash(INDEX_DOMAIN, value)
}

/// Hashes an e-mail address after trimming and lowercasing it, so
/// `A@X.com` and `a@x.com ` share an `email_hash`.
#[must_use]
pub fn hash_email(email: &str) -> String {
    domain_hash(EMAIL_DOMAIN, &normalize_email(email))
}

/// Normalises an e-mail address for comparison.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn domain_hash(domain: &[u8], value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update([0x1f]);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
