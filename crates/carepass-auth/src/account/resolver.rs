//! Mapping verified provider identities to accounts.
//!
//! Resolution order:
//!
//! 1. the provider credential (primary or linked) - existing account
//! 2. the e-mail hash - collision, resolved by linking or rejected
//! 3. otherwise a new account, created together with its consent records
//!
//! Consents sent by a returning user are recorded against the existing
//! account.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use super::linking::{AccountLinker, LinkingChallenge};
use super::vault::ProfileVault;
use crate::clock::Clock;
use crate::crypto::hash_email;
use crate::federation::{AuthProvider, OAuthIdentity};
use crate::storage::{ConsentStorage, UserStorage};
use crate::types::{AccountStatus, ConsentAcknowledgments, User};
use crate::{AuthError, AuthResult};

/// Outcome of resolving an identity.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The credential belongs to an existing account.
    Existing(User),
    /// A new account was created.
    Created(User),
    /// The e-mail belongs to an account from another provider.
    LinkingRequired(LinkingChallenge),
}

/// Consents and request metadata recorded with a sign-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignInContext<'a> {
    /// Consent flags sent with the request, if any.
    pub consents: Option<&'a ConsentAcknowledgments>,
    /// Client IP, stored encrypted on consent records.
    pub source_ip: Option<&'a str>,
}

/// Finds or creates the account for a verified identity.
pub struct IdentityResolver {
    users: Arc<dyn UserStorage>,
    consents: Arc<dyn ConsentStorage>,
    vault: ProfileVault,
    linker: Arc<AccountLinker>,
    clock: Arc<dyn Clock>,
}

impl IdentityResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStorage>,
        consents: Arc<dyn ConsentStorage>,
        vault: ProfileVault,
        linker: Arc<AccountLinker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            consents,
            vault,
            linker,
            clock,
        }
    }

    /// Resolves `identity` to an account.
    ///
    /// # Errors
    ///
    /// - `ACCOUNT_DEACTIVATED` if the matching account is not active
    /// - `ACCOUNT_CONFLICT` if the e-mail belongs to another account of the
    ///   same provider
    /// - storage and encryption failures
    pub async fn resolve(
        &self,
        identity: &OAuthIdentity,
        context: SignInContext<'_>,
    ) -> AuthResult<Resolution> {
        let now = self.clock.now();

        if let Some(mut user) = self
            .users
            .find_by_provider_subject(identity.provider, &identity.subject_id)
            .await?
        {
            if !user.is_active() {
                tracing::info!(user_id = %user.id, "Sign-in to inactive account refused");
                return Err(AuthError::AccountDeactivated);
            }
            self.users.update_last_login(user.id, now).await?;
            user.last_login_at = Some(now);
            if let Some(acks) = context.consents {
                let records = self
                    .vault
                    .seal_consents(user.id, acks, context.source_ip, now)
                    .await?;
                self.consents.record_consents(&records).await?;
            }
            tracing::debug!(user_id = %user.id, provider = %identity.provider, "Existing account");
            return Ok(Resolution::Existing(user));
        }

        let email_hash = hash_email(&identity.email);
        if let Some(existing) = self.users.find_by_email_hash(&email_hash).await? {
            if !existing.is_active() {
                return Err(AuthError::AccountDeactivated);
            }
            if existing.linked_providers().contains(&identity.provider) {
                tracing::warn!(
                    user_id = %existing.id,
                    provider = %identity.provider,
                    "E-mail already registered to another subject of the same provider"
                );
                return Err(AuthError::account_conflict(format!(
                    "email is already registered with another {} account",
                    identity.provider
                )));
            }
            let challenge = self.linker.issue(&existing, identity)?;
            return Ok(Resolution::LinkingRequired(challenge));
        }

        let user = self.create(identity, email_hash, now, context).await?;
        Ok(Resolution::Created(user))
    }

    async fn create(
        &self,
        identity: &OAuthIdentity,
        email_hash: String,
        now: OffsetDateTime,
        context: SignInContext<'_>,
    ) -> AuthResult<User> {
        let (given_name, family_name, is_private_email) = match identity.provider {
            AuthProvider::Google => (
                identity.given_name.clone(),
                identity.family_name.clone(),
                None,
            ),
            AuthProvider::Apple => (None, None, Some(identity.is_private_email.unwrap_or(false))),
        };

        let plaintext = User {
            id: Uuid::new_v4(),
            external_id: identity.subject_id.clone(),
            auth_provider: identity.provider,
            email: identity.email.clone(),
            email_hash,
            name: identity.resolved_name(),
            given_name,
            family_name,
            email_verified: identity.email_verified,
            is_private_email,
            account_status: AccountStatus::Active,
            linked_identities: Vec::new(),
            created_at: now,
            last_login_at: Some(now),
            deactivated_at: None,
        };

        let user = self.vault.seal_user(plaintext).await?;
        let consents = match context.consents {
            Some(acks) => {
                self.vault
                    .seal_consents(user.id, acks, context.source_ip, now)
                    .await?
            }
            None => Vec::new(),
        };

        self.users.create_with_consents(&user, &consents).await?;
        tracing::info!(
            user_id = %user.id,
            provider = %identity.provider,
            consents = consents.len(),
            "Account created"
        );
        Ok(user)
    }

    /// The vault used to seal new accounts.
    #[must_use]
    pub fn vault(&self) -> &ProfileVault {
        &self.vault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::crypto::{CryptoEnvelope, EncryptedValue, LocalKeyProvider};
    use crate::storage::{ConsentStorage, InMemoryAuthStorage};
    use std::time::Duration;
    use time::macros::datetime;

    struct Fixture {
        resolver: IdentityResolver,
        storage: Arc<InMemoryAuthStorage>,
        linker: Arc<AccountLinker>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(datetime!(2026-03-01 09:00 UTC)));
        let storage = Arc::new(InMemoryAuthStorage::new());
        let provider = LocalKeyProvider::new().with_key("pii-v1", LocalKeyProvider::generate_key());
        let vault = ProfileVault::new(Arc::new(CryptoEnvelope::new(Arc::new(provider), "pii-v1")));
        let linker = Arc::new(
            AccountLinker::new(
                b"linking-secret",
                "carepass",
                Duration::from_secs(300),
                storage.clone(),
                clock.clone(),
            )
            .unwrap(),
        );
        Fixture {
            resolver: IdentityResolver::new(
                storage.clone(),
                storage.clone(),
                vault,
                linker.clone(),
                clock,
            ),
            storage,
            linker,
        }
    }

    fn identity(provider: AuthProvider, subject: &str, email: &str) -> OAuthIdentity {
        OAuthIdentity {
            provider,
            subject_id: subject.to_string(),
            email: email.to_string(),
            email_verified: true,
            display_name: None,
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
            is_private_email: (provider == AuthProvider::Apple).then_some(true),
            picture_url: None,
            auth_time: None,
        }
    }

    async fn created(f: &Fixture, identity: &OAuthIdentity) -> User {
        match f
            .resolver
            .resolve(identity, SignInContext::default())
            .await
            .unwrap()
        {
            Resolution::Created(user) => user,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_then_existing() {
        let f = fixture();
        let google = identity(AuthProvider::Google, "g-1", "a@x.com");

        let user = created(&f, &google).await;
        assert!(EncryptedValue::is_envelope(&user.email));
        assert_eq!(user.email_hash, hash_email("a@x.com"));

        let profile = f.resolver.vault().open_user(&user).await.unwrap();
        assert_eq!(profile.name, "a");
        assert_eq!(profile.given_name.as_deref(), Some("Ada"));
        assert_eq!(profile.is_private_email, None);

        match f
            .resolver
            .resolve(&google, SignInContext::default())
            .await
            .unwrap()
        {
            Resolution::Existing(existing) => assert_eq!(existing.id, user.id),
            other => panic!("expected Existing, got {other:?}"),
        }
        assert_eq!(f.storage.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_apple_account_drops_google_only_fields() {
        let f = fixture();
        let user = created(&f, &identity(AuthProvider::Apple, "a-1", "b@icloud.com")).await;
        let profile = f.resolver.vault().open_user(&user).await.unwrap();
        assert_eq!(profile.given_name, None);
        assert_eq!(profile.family_name, None);
        assert_eq!(profile.is_private_email, Some(true));
    }

    #[tokio::test]
    async fn test_cross_provider_collision_requires_linking() {
        let f = fixture();
        let google_user = created(&f, &identity(AuthProvider::Google, "g-1", "a@x.com")).await;

        let apple = identity(AuthProvider::Apple, "a-1", "A@X.com");
        let challenge = match f
            .resolver
            .resolve(&apple, SignInContext::default())
            .await
            .unwrap()
        {
            Resolution::LinkingRequired(challenge) => challenge,
            other => panic!("expected LinkingRequired, got {other:?}"),
        };
        assert_eq!(challenge.existing_user_id, google_user.id);
        assert_eq!(f.storage.user_count().await, 1);

        let outcome = f
            .linker
            .confirm_link(&challenge.linking_token, "confirmed")
            .await
            .unwrap();
        assert_eq!(outcome.user.id, google_user.id);

        // The Apple credential now resolves straight to the Google account.
        match f
            .resolver
            .resolve(&apple, SignInContext::default())
            .await
            .unwrap()
        {
            Resolution::Existing(user) => assert_eq!(user.id, google_user.id),
            other => panic!("expected Existing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_provider_collision_is_conflict() {
        let f = fixture();
        created(&f, &identity(AuthProvider::Google, "g-1", "a@x.com")).await;

        let err = f
            .resolver
            .resolve(
                &identity(AuthProvider::Google, "g-2", "a@x.com"),
                SignInContext::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNT_CONFLICT");
    }

    #[tokio::test]
    async fn test_deactivated_account() {
        let f = fixture();
        let google = identity(AuthProvider::Google, "g-1", "a@x.com");
        let user = created(&f, &google).await;
        f.storage
            .set_account_status(user.id, AccountStatus::Deactivated)
            .await
            .unwrap();

        let err = f
            .resolver
            .resolve(&google, SignInContext::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNT_DEACTIVATED");
    }

    #[tokio::test]
    async fn test_consents_recorded_with_account() {
        let f = fixture();
        let acks = ConsentAcknowledgments {
            medical_disclaimers: true,
            terms_of_service: true,
            privacy_policy: true,
            ..Default::default()
        };
        let user = match f
            .resolver
            .resolve(
                &identity(AuthProvider::Google, "g-1", "a@x.com"),
                SignInContext {
                    consents: Some(&acks),
                    source_ip: Some("198.51.100.4"),
                },
            )
            .await
            .unwrap()
        {
            Resolution::Created(user) => user,
            other => panic!("expected Created, got {other:?}"),
        };

        let records = f.storage.list_for_user(user.id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.granted));
    }

    #[tokio::test]
    async fn test_consents_recorded_for_returning_user() {
        let f = fixture();
        let google = identity(AuthProvider::Google, "g-1", "a@x.com");
        let user = created(&f, &google).await;
        assert!(f.storage.list_for_user(user.id).await.unwrap().is_empty());

        let acks = ConsentAcknowledgments {
            medical_disclaimers: true,
            terms_of_service: true,
            privacy_policy: true,
            ..Default::default()
        };
        let resolution = f
            .resolver
            .resolve(
                &google,
                SignInContext {
                    consents: Some(&acks),
                    source_ip: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Existing(ref u) if u.id == user.id));

        let records = f.storage.list_for_user(user.id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.user_id == user.id));
    }
}
