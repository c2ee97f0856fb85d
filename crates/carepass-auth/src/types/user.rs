//! User domain types.
//!
//! A [`User`] as stored: PII columns hold envelope-encrypted strings and
//! lookups go through `email_hash`. [`UserProfile`] is the decrypted view
//! returned to the mobile app.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::federation::AuthProvider;

/// Fields of a user record encrypted at rest.
pub const USER_PII_FIELDS: [&str; 4] = ["email", "name", "given_name", "family_name"];

/// `data_type` of the encryption context for user PII.
pub const USER_PII_DATA_TYPE: &str = "user_pii";

/// Lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Normal account.
    #[default]
    Active,
    /// Soft-deleted by the user or support.
    Deactivated,
    /// Blocked by an administrator.
    Suspended,
}

impl AccountStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deactivated" => Ok(Self::Deactivated),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// An alternate provider credential attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    /// Provider of the linked credential.
    pub provider: AuthProvider,

    /// Subject at that provider.
    pub subject_id: String,

    /// `hash_email` of the e-mail the provider asserted when linking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_hash: Option<String>,

    /// When the credential was linked.
    #[serde(with = "time::serde::rfc3339")]
    pub linked_at: OffsetDateTime,
}

/// A user account as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Internal identifier.
    pub id: Uuid,

    /// Subject at the primary provider.
    pub external_id: String,

    /// Primary provider.
    pub auth_provider: AuthProvider,

    /// E-mail address (encrypted).
    pub email: String,

    /// `hash_email` of the plaintext address.
    pub email_hash: String,

    /// Display name (encrypted).
    pub name: String,

    /// Given name (encrypted, Google only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name (encrypted, Google only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Whether the provider verified the e-mail address.
    pub email_verified: bool,

    /// Apple private relay flag (Apple only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,

    /// Lifecycle state.
    #[serde(default)]
    pub account_status: AccountStatus,

    /// Alternate provider credentials.
    #[serde(default)]
    pub linked_identities: Vec<LinkedIdentity>,

    /// When the account was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last successful sign-in.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,

    /// When the account was deactivated.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deactivated_at: Option<OffsetDateTime>,
}

impl User {
    /// Returns `true` if the account may sign in.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.account_status == AccountStatus::Active
    }

    /// Returns `true` if `(provider, subject_id)` is the primary credential
    /// or one of the linked ones.
    #[must_use]
    pub fn has_identity(&self, provider: AuthProvider, subject_id: &str) -> bool {
        (self.auth_provider == provider && self.external_id == subject_id)
            || self
                .linked_identities
                .iter()
                .any(|l| l.provider == provider && l.subject_id == subject_id)
    }

    /// Primary provider first, then linked providers, without duplicates.
    #[must_use]
    pub fn linked_providers(&self) -> Vec<AuthProvider> {
        let mut providers = vec![self.auth_provider];
        for linked in &self.linked_identities {
            if !providers.contains(&linked.provider) {
                providers.push(linked.provider);
            }
        }
        providers
    }

    /// Attaches a credential. Returns `false` if it was already attached.
    pub fn add_linked_identity(&mut self, identity: LinkedIdentity) -> bool {
        if self.has_identity(identity.provider, &identity.subject_id) {
            return false;
        }
        self.linked_identities.push(identity);
        true
    }
}

/// Decrypted view of a [`User`] returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User ID.
    pub user_id: Uuid,
    /// E-mail address.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Given name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    /// Family name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Primary provider.
    pub auth_provider: AuthProvider,
    /// Whether the provider verified the e-mail address.
    pub email_verified: bool,
    /// Apple private relay flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private_email: Option<bool>,
    /// When the account was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            external_id: "g-1".to_string(),
            auth_provider: AuthProvider::Google,
            email: "enc.v1.x".to_string(),
            email_hash: "h".repeat(64),
            name: "enc.v1.y".to_string(),
            given_name: None,
            family_name: None,
            email_verified: true,
            is_private_email: None,
            account_status: AccountStatus::Active,
            linked_identities: Vec::new(),
            created_at: datetime!(2026-03-01 09:00 UTC),
            last_login_at: None,
            deactivated_at: None,
        }
    }

    #[test]
    fn test_linking_is_idempotent() {
        let mut user = user();
        let apple = LinkedIdentity {
            provider: AuthProvider::Apple,
            subject_id: "a-1".to_string(),
            email_hash: None,
            linked_at: datetime!(2026-03-01 09:05 UTC),
        };

        assert!(user.add_linked_identity(apple.clone()));
        assert!(!user.add_linked_identity(apple));
        assert_eq!(user.linked_identities.len(), 1);
        assert!(user.has_identity(AuthProvider::Apple, "a-1"));
        assert!(user.has_identity(AuthProvider::Google, "g-1"));
        assert!(!user.has_identity(AuthProvider::Apple, "g-1"));
        assert_eq!(
            user.linked_providers(),
            vec![AuthProvider::Google, AuthProvider::Apple]
        );
    }

    #[test]
    fn test_primary_identity_is_not_relinked() {
        let mut user = user();
        assert!(!user.add_linked_identity(LinkedIdentity {
            provider: AuthProvider::Google,
            subject_id: "g-1".to_string(),
            email_hash: None,
            linked_at: datetime!(2026-03-01 09:05 UTC),
        }));
    }

    #[test]
    fn test_status() {
        let mut user = user();
        assert!(user.is_active());
        user.account_status = AccountStatus::Suspended;
        assert!(!user.is_active());
        assert_eq!(
            "deactivated".parse::<AccountStatus>().unwrap(),
            AccountStatus::Deactivated
        );
        assert!("gone".parse::<AccountStatus>().is_err());
    }

    #[test]
    fn test_user_json_roundtrip_keeps_links() {
        let mut user = user();
        user.add_linked_identity(LinkedIdentity {
            provider: AuthProvider::Apple,
            subject_id: "a-1".to_string(),
            email_hash: Some("e".repeat(64)),
            linked_at: datetime!(2026-03-01 09:05 UTC),
        });
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["account_status"], "active");
        assert_eq!(json["linked_identities"][0]["provider"], "apple");
        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }
}
