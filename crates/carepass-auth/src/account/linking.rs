//! Account linking tokens.
//!
//! When a sign-in collides by e-mail with an account from another provider,
//! the client receives a short-lived HS256 token describing the pending link.
//! Sending it back with `confirmation = "confirmed"` attaches the new
//! provider credential to the existing account.
//!
//! Tokens are stateless: validity is signature, purpose and expiry only.
//! Confirmation is idempotent, so replaying a token within its lifetime is
//! harmless.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, to_time_duration};
use crate::crypto::hash_email;
use crate::federation::{AuthProvider, OAuthIdentity};
use crate::storage::UserStorage;
use crate::token::{ExpiringClaims, JwtService};
use crate::types::{LinkedIdentity, User};
use crate::{AuthError, AuthResult};

/// `purpose` claim of linking tokens.
pub const LINKING_PURPOSE: &str = "account_linking";

/// The literal the client must send to confirm a link.
pub const LINKING_CONFIRMATION: &str = "confirmed";

/// Claims of a linking token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingClaims {
    /// Issuer.
    pub iss: String,
    /// Existing user ID.
    pub sub: String,
    /// Existing user ID.
    pub existing_user_id: Uuid,
    /// Provider being linked.
    pub new_provider: AuthProvider,
    /// Subject at the provider being linked.
    pub new_provider_subject_id: String,
    /// E-mail asserted by the provider being linked.
    pub new_provider_email: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// JWT ID.
    pub jti: String,
    /// Always [`LINKING_PURPOSE`].
    pub purpose: String,
}

impl ExpiringClaims for LinkingClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// A pending link handed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingChallenge {
    /// Signed linking token.
    pub linking_token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
    /// Existing account.
    pub existing_user_id: Uuid,
    /// Primary provider of the existing account.
    pub existing_provider: AuthProvider,
    /// Provider the client signed in with.
    pub new_provider: AuthProvider,
}

impl From<LinkingChallenge> for AuthError {
    fn from(challenge: LinkingChallenge) -> Self {
        Self::AccountLinkingRequired {
            linking_token: challenge.linking_token,
            expires_in: challenge.expires_in,
            existing_provider: challenge.existing_provider,
            new_provider: challenge.new_provider,
        }
    }
}

/// Result of a confirmed link.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    /// The existing account, including the new credential.
    pub user: User,
    /// Providers that can now sign in to the account.
    pub linked_providers: Vec<AuthProvider>,
    /// `false` if the credential was already linked.
    pub newly_linked: bool,
}

/// Issues and redeems linking tokens.
pub struct AccountLinker {
    jwt: JwtService,
    lifetime: Duration,
    users: Arc<dyn UserStorage>,
    clock: Arc<dyn Clock>,
}

impl AccountLinker {
    /// Creates a linker signing with `secret`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `secret` is empty.
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        lifetime: Duration,
        users: Arc<dyn UserStorage>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let jwt = JwtService::hs256(secret, issuer)
            .map_err(|e| AuthError::configuration(format!("linking token key: {e}")))?;
        Ok(Self {
            jwt,
            lifetime,
            users,
            clock,
        })
    }

    /// Issues a linking token for attaching `identity` to `existing`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if signing fails.
    pub fn issue(&self, existing: &User, identity: &OAuthIdentity) -> AuthResult<LinkingChallenge> {
        let now = self.clock.now();
        let exp = now + to_time_duration(self.lifetime);

        let claims = LinkingClaims {
            iss: self.jwt.issuer().to_string(),
            sub: existing.id.to_string(),
            existing_user_id: existing.id,
            new_provider: identity.provider,
            new_provider_subject_id: identity.subject_id.clone(),
            new_provider_email: identity.email.clone(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            purpose: LINKING_PURPOSE.to_string(),
        };

        let linking_token = self.jwt.encode(&claims)?;
        tracing::info!(
            user_id = %existing.id,
            existing_provider = %existing.auth_provider,
            new_provider = %identity.provider,
            "Account linking required"
        );

        Ok(LinkingChallenge {
            linking_token,
            expires_in: self.lifetime.as_secs(),
            existing_user_id: existing.id,
            existing_provider: existing.auth_provider,
            new_provider: identity.provider,
        })
    }

    /// Verifies a linking token's signature, purpose and expiry.
    ///
    /// A token is still accepted in the second it expires.
    ///
    /// # Errors
    ///
    /// Returns `LINKING_TOKEN_INVALID` for any failure.
    pub fn verify_token(&self, token: &str) -> AuthResult<LinkingClaims> {
        let claims: LinkingClaims = self
            .jwt
            .decode_ignoring_expiry(token.trim())
            .map_err(|e| {
                tracing::debug!(error = %e, "Linking token rejected");
                AuthError::linking_token_invalid("linking token is malformed or has a bad signature")
            })?;

        if claims.exp < self.clock.now().unix_timestamp() {
            return Err(AuthError::linking_token_invalid("linking token expired"));
        }

        if claims.purpose != LINKING_PURPOSE {
            return Err(AuthError::linking_token_invalid("token purpose mismatch"));
        }

        Ok(claims)
    }

    /// Confirms a link, attaching the new provider to the existing account.
    ///
    /// # Errors
    ///
    /// - `INVALID_CONFIRMATION` unless `confirmation` is `"confirmed"`
    /// - `LINKING_TOKEN_INVALID` if the token is rejected
    /// - `USER_NOT_FOUND` if the account no longer exists
    /// - `ACCOUNT_DEACTIVATED` if the account is not active
    pub async fn confirm_link(&self, token: &str, confirmation: &str) -> AuthResult<LinkOutcome> {
        if confirmation != LINKING_CONFIRMATION {
            return Err(AuthError::invalid_input(
                "INVALID_CONFIRMATION",
                format!("confirmation must be \"{LINKING_CONFIRMATION}\""),
            ));
        }

        let claims = self.verify_token(token)?;

        let mut user = self
            .users
            .find_by_id(claims.existing_user_id)
            .await?
            .ok_or_else(|| AuthError::user_not_found(claims.existing_user_id))?;

        if !user.is_active() {
            return Err(AuthError::AccountDeactivated);
        }

        let linked = LinkedIdentity {
            provider: claims.new_provider,
            subject_id: claims.new_provider_subject_id,
            email_hash: Some(hash_email(&claims.new_provider_email)),
            linked_at: self.clock.now(),
        };

        let newly_linked = self.users.add_linked_identity(user.id, &linked).await?;
        if newly_linked {
            user.add_linked_identity(linked);
            tracing::info!(user_id = %user.id, provider = %claims.new_provider, "Provider linked");
        } else {
            tracing::debug!(user_id = %user.id, "Provider already linked");
        }

        Ok(LinkOutcome {
            linked_providers: user.linked_providers(),
            user,
            newly_linked,
        })
    }

    /// Linking token lifetime.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::InMemoryAuthStorage;
    use crate::types::AccountStatus;
    use time::macros::datetime;

    struct Fixture {
        linker: AccountLinker,
        storage: Arc<InMemoryAuthStorage>,
        clock: Arc<FixedClock>,
        existing: User,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(datetime!(2026-03-01 09:00 UTC)));
        let storage = Arc::new(InMemoryAuthStorage::new());
        let existing = User {
            id: Uuid::new_v4(),
            external_id: "g-1".to_string(),
            auth_provider: AuthProvider::Google,
            email: "enc".to_string(),
            email_hash: hash_email("a@x.com"),
            name: "enc".to_string(),
            given_name: None,
            family_name: None,
            email_verified: true,
            is_private_email: None,
            account_status: AccountStatus::Active,
            linked_identities: Vec::new(),
            created_at: clock.now(),
            last_login_at: None,
            deactivated_at: None,
        };
        storage.create_with_consents(&existing, &[]).await.unwrap();

        let linker = AccountLinker::new(
            b"linking-secret",
            "carepass",
            Duration::from_secs(300),
            storage.clone(),
            clock.clone(),
        )
        .unwrap();

        Fixture {
            linker,
            storage,
            clock,
            existing,
        }
    }

    fn apple_identity() -> OAuthIdentity {
        OAuthIdentity {
            provider: AuthProvider::Apple,
            subject_id: "a-1".to_string(),
            email: "A@x.com".to_string(),
            email_verified: true,
            display_name: None,
            given_name: None,
            family_name: None,
            is_private_email: Some(false),
            picture_url: None,
            auth_time: None,
        }
    }

    #[tokio::test]
    async fn test_issue_and_confirm() {
        let f = fixture().await;
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();
        assert_eq!(challenge.expires_in, 300);
        assert_eq!(challenge.existing_provider, AuthProvider::Google);
        assert_eq!(challenge.new_provider, AuthProvider::Apple);

        let outcome = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap();
        assert!(outcome.newly_linked);
        assert_eq!(outcome.user.id, f.existing.id);
        assert_eq!(
            outcome.linked_providers,
            vec![AuthProvider::Google, AuthProvider::Apple]
        );

        let found = f
            .storage
            .find_by_provider_subject(AuthProvider::Apple, "a-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, f.existing.id);
        assert_eq!(f.storage.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let f = fixture().await;
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();
        f.linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap();

        let again = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap();
        assert!(!again.newly_linked);
        assert_eq!(again.user.linked_identities.len(), 1);
    }

    #[tokio::test]
    async fn test_token_valid_until_expiry_second() {
        let f = fixture().await;
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();
        f.clock.advance(time::Duration::minutes(5));

        let outcome = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap();
        assert!(outcome.newly_linked);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let f = fixture().await;
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();
        f.clock.advance(time::Duration::minutes(5) + time::Duration::seconds(1));

        let err = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LINKING_TOKEN_INVALID");
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_wrong_confirmation() {
        let f = fixture().await;
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();

        let err = f
            .linker
            .confirm_link(&challenge.linking_token, "yes")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIRMATION");
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_forged_and_mispurposed_tokens() {
        let f = fixture().await;

        let forger = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let now = f.clock.now().unix_timestamp();
        let mut claims = LinkingClaims {
            iss: "carepass".to_string(),
            sub: f.existing.id.to_string(),
            existing_user_id: f.existing.id,
            new_provider: AuthProvider::Apple,
            new_provider_subject_id: "attacker".to_string(),
            new_provider_email: "a@x.com".to_string(),
            iat: now,
            exp: now + 300,
            jti: "j".to_string(),
            purpose: LINKING_PURPOSE.to_string(),
        };
        let forged = forger.encode(&claims).unwrap();
        let err = f.linker.confirm_link(&forged, "confirmed").await.unwrap_err();
        assert_eq!(err.error_code(), "LINKING_TOKEN_INVALID");

        let same_key = JwtService::hs256(b"linking-secret", "carepass").unwrap();
        claims.purpose = "password_reset".to_string();
        let mispurposed = same_key.encode(&claims).unwrap();
        let err = f
            .linker
            .confirm_link(&mispurposed, "confirmed")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LINKING_TOKEN_INVALID");

        let err = f
            .linker
            .confirm_link("garbage", "confirmed")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "LINKING_TOKEN_INVALID");
    }

    #[tokio::test]
    async fn test_missing_or_deactivated_user() {
        let f = fixture().await;
        let mut ghost = f.existing.clone();
        ghost.id = Uuid::new_v4();
        let challenge = f.linker.issue(&ghost, &apple_identity()).unwrap();
        let err = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "USER_NOT_FOUND");

        f.storage
            .set_account_status(f.existing.id, AccountStatus::Deactivated)
            .await
            .unwrap();
        let challenge = f.linker.issue(&f.existing, &apple_identity()).unwrap();
        let err = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNT_DEACTIVATED");
    }
}
