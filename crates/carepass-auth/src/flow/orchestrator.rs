//! Onboarding, linking confirmation and refresh flows.
//!
//! # Onboarding
//!
//! ```text
//! provider + token ──► IdentityVerifier ──► IdentityResolver ──► SessionIssuer
//!                                             │
//!                                             └─ collision ──► 409 + linking token
//! ```
//!
//! Request validation (provider name, consents, device info) runs before any
//! call to an identity provider. Every flow records exactly one audit event.

use std::sync::Arc;

use url::Url;

use super::types::{
    ConfirmLinkingRequest, ConfirmLinkingResponse, OnboardingRequest, OnboardingResponse,
    RefreshRequest, RefreshResponse, RequestContext,
};
use crate::account::{AccountLinker, IdentityResolver, SignInContext, ProfileVault, Resolution};
use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::crypto::{CryptoEnvelope, LocalKeyProvider};
use crate::federation::{
    AppleKeyCache, AppleKeyCacheConfig, AppleVerifier, AuthProvider, GoogleVerifier,
    HttpAppleKeyFetcher, IdentityVerifier, ProviderCredentials, ProviderVerifier,
};
use crate::session::SessionIssuer;
use crate::storage::AuthStorage;
use crate::token::JwtService;
use crate::{AuthError, AuthResult};

/// Composes verification, resolution and session issuance into the
/// endpoint flows.
pub struct AuthOrchestrator {
    verifier: Arc<dyn IdentityVerifier>,
    resolver: IdentityResolver,
    linker: Arc<AccountLinker>,
    sessions: SessionIssuer,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AuthOrchestrator {
    /// Creates an orchestrator from its components.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        resolver: IdentityResolver,
        linker: Arc<AccountLinker>,
        sessions: SessionIssuer,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            verifier,
            resolver,
            linker,
            sessions,
            audit,
            clock,
        }
    }

    /// Wires the production components from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated auth configuration
    /// * `storage` - Storage backend for users, devices, sessions and consents
    /// * `clock` - Time source shared by every component
    /// * `audit` - Destination of audit events
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid, a
    /// master key is malformed, the default key is missing, a URL does not
    /// parse or a signing key is rejected.
    pub fn from_config(
        config: &AuthConfig,
        storage: AuthStorage,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        // Field encryption
        let key_provider = LocalKeyProvider::from_base64_keys(&config.crypto.master_keys)
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        if !key_provider.has_key(&config.crypto.default_key_id) {
            return Err(AuthError::configuration(format!(
                "crypto.master_keys has no entry for default key '{}'",
                config.crypto.default_key_id
            )));
        }
        let envelope = CryptoEnvelope::new(
            Arc::new(key_provider),
            config.crypto.default_key_id.clone(),
        );
        let vault = ProfileVault::new(Arc::new(envelope));

        // Apple
        let keys_url = parse_url("apple.keys_url", &config.apple.keys_url)?;
        let fetcher = HttpAppleKeyFetcher::new(
            keys_url,
            AppleKeyCacheConfig::new()
                .with_ttl(config.apple.key_cache_ttl)
                .with_request_timeout(config.apple.request_timeout)
                .with_allow_http(config.apple.allow_http),
        )
        .map_err(|e| AuthError::configuration(e.to_string()))?;
        let key_cache = Arc::new(AppleKeyCache::new(
            Arc::new(fetcher),
            config.apple.key_cache_ttl,
            clock.clone(),
        ));
        let apple = AppleVerifier::new(
            config.apple.client_id.clone(),
            config.apple.issuer.clone(),
            key_cache,
            clock.clone(),
        );

        // Google
        let google = GoogleVerifier::new(
            parse_url("google.tokeninfo_url", &config.google.tokeninfo_url)?,
            config.google.client_ids.clone(),
            config.google.request_timeout,
            clock.clone(),
        )
        .map_err(|e| AuthError::configuration(format!("google http client: {e}")))?;

        // Tokens
        let jwt = match (&config.tokens.private_key_pem, &config.tokens.public_key_pem) {
            (Some(private_pem), Some(public_pem)) => JwtService::rs256_from_pem(
                config.tokens.key_id.clone(),
                private_pem,
                public_pem,
                config.tokens.issuer.clone(),
            ),
            _ => JwtService::hs256(
                config.tokens.access_token_secret.as_bytes(),
                config.tokens.issuer.clone(),
            ),
        }
        .map_err(|e| AuthError::configuration(format!("access token key: {e}")))?;

        let linker = Arc::new(AccountLinker::new(
            config.linking.token_secret.as_bytes(),
            config.tokens.issuer.clone(),
            config.linking.token_lifetime,
            storage.users.clone(),
            clock.clone(),
        )?);
        let resolver = IdentityResolver::new(
            storage.users.clone(),
            storage.consents.clone(),
            vault.clone(),
            linker.clone(),
            clock.clone(),
        );
        let sessions = SessionIssuer::new(
            jwt,
            config.tokens.access_token_lifetime,
            config.tokens.refresh_token_lifetime,
            storage,
            vault,
            clock.clone(),
        );

        tracing::info!(
            google_clients = config.google.client_ids.len(),
            apple_client_id = %config.apple.client_id,
            rs256 = config.tokens.private_key_pem.is_some(),
            "Auth orchestrator initialized"
        );

        Ok(Self::new(
            Arc::new(ProviderVerifier::new(google, apple)),
            resolver,
            linker,
            sessions,
            audit,
            clock,
        ))
    }

    /// The session issuer, for revocation and access token checks.
    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    // =========================================================================
    // Onboarding
    // =========================================================================

    /// Signs in (or signs up) with a provider token.
    ///
    /// # Errors
    ///
    /// - `INVALID_PROVIDER`, `INVALID_REQUEST`, `CONSENT_REQUIRED`,
    ///   `INVALID_DEVICE_INFO` for bad input
    /// - provider verification codes
    /// - `ACCOUNT_LINKING_REQUIRED` with a linking token on e-mail collision
    /// - `ACCOUNT_CONFLICT`, `ACCOUNT_DEACTIVATED`
    pub async fn onboarding(
        &self,
        request: OnboardingRequest,
        ctx: &RequestContext,
    ) -> AuthResult<OnboardingResponse> {
        let provider = request.provider.parse::<AuthProvider>().ok();
        let result = self.run_onboarding(&request, ctx).await;

        let now = self.clock.now();
        let event = match &result {
            Ok(response) => AuditEvent::success(AuditAction::Onboarding, &ctx.correlation_id, now)
                .actor(response.user.user_id)
                .new_user(response.is_new_user),
            Err(e) => AuditEvent::failure(AuditAction::Onboarding, &ctx.correlation_id, e, now),
        };
        self.audit.record(&event.provider(provider));

        result
    }

    async fn run_onboarding(
        &self,
        request: &OnboardingRequest,
        ctx: &RequestContext,
    ) -> AuthResult<OnboardingResponse> {
        let provider: AuthProvider = request.provider.parse()?;

        if let Some(consents) = &request.consent_acknowledgments {
            consents.validate()?;
        }
        if let Some(device) = &request.device_info {
            device.validate()?;
        }

        let token = request.token_for(provider).ok_or_else(|| {
            AuthError::invalid_request(format!("an id_token is required for {provider}"))
        })?;

        let credentials = ProviderCredentials::new(provider, token).with_auth_code(
            match provider {
                AuthProvider::Apple => request.apple_authorization_code.clone(),
                AuthProvider::Google => None,
            },
        );
        let identity = self.verifier.verify(&credentials).await?;

        let context = SignInContext {
            consents: request.consent_acknowledgments.as_ref(),
            source_ip: ctx.source_ip.as_deref(),
        };
        let (user, is_new_user) = match self.resolver.resolve(&identity, context).await? {
            Resolution::Existing(user) => (user, false),
            Resolution::Created(user) => (user, true),
            Resolution::LinkingRequired(challenge) => {
                tracing::info!(
                    correlation_id = %ctx.correlation_id,
                    existing_provider = %challenge.existing_provider,
                    new_provider = %challenge.new_provider,
                    "Account linking required"
                );
                return Err(challenge.into());
            }
        };

        let issued = self
            .sessions
            .issue(&user, request.device_info.as_ref(), &ctx.client_info())
            .await?;

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            user_id = %user.id,
            provider = %provider,
            is_new_user,
            "Onboarding completed"
        );
        Ok(OnboardingResponse::from_issued(issued, is_new_user))
    }

    // =========================================================================
    // Linking
    // =========================================================================

    /// Confirms a pending account link and signs in to the linked account.
    ///
    /// # Errors
    ///
    /// - `INVALID_CONFIRMATION`, `INVALID_DEVICE_INFO` for bad input
    /// - `LINKING_TOKEN_INVALID` for a forged, mis-purposed or expired token
    /// - `USER_NOT_FOUND`, `ACCOUNT_DEACTIVATED`
    pub async fn confirm_linking(
        &self,
        request: ConfirmLinkingRequest,
        ctx: &RequestContext,
    ) -> AuthResult<ConfirmLinkingResponse> {
        let provider = self
            .linker
            .verify_token(&request.linking_token)
            .ok()
            .map(|claims| claims.new_provider);
        let result = self.run_confirm_linking(&request, ctx).await;

        let now = self.clock.now();
        let event = match &result {
            Ok(response) => {
                AuditEvent::success(AuditAction::ConfirmLinking, &ctx.correlation_id, now)
                    .actor(response.onboarding.user.user_id)
            }
            Err(e) => AuditEvent::failure(AuditAction::ConfirmLinking, &ctx.correlation_id, e, now),
        };
        self.audit.record(&event.provider(provider));

        result
    }

    async fn run_confirm_linking(
        &self,
        request: &ConfirmLinkingRequest,
        ctx: &RequestContext,
    ) -> AuthResult<ConfirmLinkingResponse> {
        if let Some(device) = &request.device_info {
            device.validate()?;
        }

        let outcome = self
            .linker
            .confirm_link(request.linking_token.trim(), &request.confirmation)
            .await?;

        let issued = self
            .sessions
            .issue(&outcome.user, request.device_info.as_ref(), &ctx.client_info())
            .await?;

        tracing::info!(
            correlation_id = %ctx.correlation_id,
            user_id = %outcome.user.id,
            newly_linked = outcome.newly_linked,
            "Account linking confirmed"
        );
        Ok(ConfirmLinkingResponse {
            onboarding: OnboardingResponse::from_issued(issued, false),
            linked_providers: outcome.linked_providers,
            account_linked: true,
        })
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Rotates a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REFRESH_TOKEN` for any token problem.
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        ctx: &RequestContext,
    ) -> AuthResult<RefreshResponse> {
        let result = self
            .sessions
            .refresh(
                &request.refresh_token,
                request.device_id.as_deref(),
                &ctx.client_info(),
            )
            .await;

        let now = self.clock.now();
        let event = match &result {
            Ok(issued) => AuditEvent::success(AuditAction::Refresh, &ctx.correlation_id, now)
                .actor(issued.user.id)
                .provider(Some(issued.user.auth_provider)),
            Err(e) => AuditEvent::failure(AuditAction::Refresh, &ctx.correlation_id, e, now),
        };
        self.audit.record(&event);

        Ok(result?.into())
    }
}

fn parse_url(field: &str, value: &str) -> AuthResult<Url> {
    Url::parse(value).map_err(|e| AuthError::configuration(format!("{field}: {e}")))
}
