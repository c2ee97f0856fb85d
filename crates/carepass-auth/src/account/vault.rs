//! PII sealing for user and consent records.
//!
//! User PII is encrypted under the context `{user_id, data_type: "user_pii"}`
//! and consent source IPs under `{user_id, data_type: "consent"}`, so a
//! ciphertext copied into another user's row fails to decrypt.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::crypto::{CryptoEnvelope, EncryptionContext, FieldRecord};
use crate::types::{
    CONSENT_DATA_TYPE, ConsentAcknowledgments, ConsentRecord, USER_PII_DATA_TYPE,
    USER_PII_FIELDS, User, UserProfile,
};
use crate::{AuthError, AuthResult};

/// Encrypts and decrypts the PII columns of accounts and consents.
#[derive(Clone)]
pub struct ProfileVault {
    envelope: Arc<CryptoEnvelope>,
}

impl ProfileVault {
    /// Creates a vault over `envelope`.
    #[must_use]
    pub fn new(envelope: Arc<CryptoEnvelope>) -> Self {
        Self { envelope }
    }

    /// Encrypts the PII fields of a user holding plaintext values.
    ///
    /// # Errors
    ///
    /// Returns an error if any field fails to encrypt; the user must then
    /// not be written.
    pub async fn seal_user(&self, mut user: User) -> AuthResult<User> {
        let context = EncryptionContext::for_user(user.id, USER_PII_DATA_TYPE);
        let sealed = self
            .envelope
            .encrypt_fields(
                pii_record(&user),
                &USER_PII_FIELDS,
                self.envelope.default_key_id(),
                &context,
            )
            .await?;
        apply_pii(&mut user, sealed)?;
        Ok(user)
    }

    /// Decrypts a stored user into the client-facing profile.
    ///
    /// # Errors
    ///
    /// Fails closed if any PII field does not decrypt.
    pub async fn open_user(&self, user: &User) -> AuthResult<UserProfile> {
        let context = EncryptionContext::for_user(user.id, USER_PII_DATA_TYPE);
        let opened = self
            .envelope
            .decrypt_fields(pii_record(user), &USER_PII_FIELDS, &context)
            .await?;

        let mut plain = user.clone();
        apply_pii(&mut plain, opened)?;

        Ok(UserProfile {
            user_id: plain.id,
            email: plain.email,
            name: plain.name,
            given_name: plain.given_name,
            family_name: plain.family_name,
            auth_provider: plain.auth_provider,
            email_verified: plain.email_verified,
            is_private_email: plain.is_private_email,
            created_at: plain.created_at,
        })
    }

    /// Builds encrypted consent records from the acknowledgments.
    ///
    /// # Errors
    ///
    /// Returns an error if the source IP fails to encrypt.
    pub async fn seal_consents(
        &self,
        user_id: Uuid,
        acknowledgments: &ConsentAcknowledgments,
        source_ip: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<Vec<ConsentRecord>> {
        let context = EncryptionContext::for_user(user_id, CONSENT_DATA_TYPE);
        let decisions = acknowledgments.decisions();
        let mut records = Vec::with_capacity(decisions.len());

        for (consent_type, granted) in decisions {
            records.push(ConsentRecord {
                id: Uuid::new_v4(),
                user_id,
                consent_type,
                granted,
                source_ip: self
                    .envelope
                    .encrypt_optional(source_ip, "source_ip", &context)
                    .await?,
                recorded_at: now,
            });
        }
        Ok(records)
    }

    /// Decrypts the source IP of a consent record.
    ///
    /// # Errors
    ///
    /// Fails closed if the value does not decrypt for this user.
    pub async fn open_consent_ip(&self, record: &ConsentRecord) -> AuthResult<Option<String>> {
        let context = EncryptionContext::for_user(record.user_id, CONSENT_DATA_TYPE);
        Ok(self
            .envelope
            .decrypt_optional(record.source_ip.as_deref(), "source_ip", &context)
            .await?)
    }
}

fn pii_record(user: &User) -> FieldRecord {
    let optional = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);

    let mut record = FieldRecord::new();
    record.insert("email".into(), Value::String(user.email.clone()));
    record.insert("name".into(), Value::String(user.name.clone()));
    record.insert("given_name".into(), optional(&user.given_name));
    record.insert("family_name".into(), optional(&user.family_name));
    record
}

fn apply_pii(user: &mut User, mut record: FieldRecord) -> AuthResult<()> {
    let mut take = |field: &str| match record.remove(field) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    user.email = take("email").ok_or_else(|| AuthError::internal("email field missing"))?;
    user.name = take("name").ok_or_else(|| AuthError::internal("name field missing"))?;
    user.given_name = take("given_name");
    user.family_name = take("family_name");
    Ok(())
}
