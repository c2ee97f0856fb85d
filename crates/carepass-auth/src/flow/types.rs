//! Request and response bodies of the auth endpoints.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::federation::AuthProvider;
use crate::session::{ClientInfo, IssuedSession};
use crate::types::{ConsentAcknowledgments, DeviceRegistration, UserProfile};

/// `token_type` of every token response.
pub const BEARER_TOKEN_TYPE: &str = "Bearer";

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /auth/onboarding`.
///
/// The provider token may arrive as `id_token` or in the provider-specific
/// field (`google_id_token` / `apple_id_token`); the specific field wins.
#[derive(Clone, Default, Deserialize)]
pub struct OnboardingRequest {
    /// `"google"` or `"apple"`.
    #[serde(default)]
    pub provider: String,

    /// Provider token (either provider).
    #[serde(default)]
    pub id_token: Option<String>,

    /// Google ID token.
    #[serde(default)]
    pub google_id_token: Option<String>,

    /// Apple identity token.
    #[serde(default)]
    pub apple_id_token: Option<String>,

    /// Apple authorization code.
    #[serde(default)]
    pub apple_authorization_code: Option<String>,

    /// Consent flags collected by the app.
    #[serde(default)]
    pub consent_acknowledgments: Option<ConsentAcknowledgments>,

    /// Device to bind the session to.
    #[serde(default)]
    pub device_info: Option<DeviceRegistration>,
}

impl OnboardingRequest {
    /// Returns the non-blank token for `provider`, if any.
    #[must_use]
    pub fn token_for(&self, provider: AuthProvider) -> Option<&str> {
        let specific = match provider {
            AuthProvider::Google => self.google_id_token.as_deref(),
            AuthProvider::Apple => self.apple_id_token.as_deref(),
        };
        specific
            .into_iter()
            .chain(self.id_token.as_deref())
            .map(str::trim)
            .find(|token| !token.is_empty())
    }
}

impl std::fmt::Debug for OnboardingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("OnboardingRequest")
            .field("provider", &self.provider)
            .field("id_token", &redacted(&self.id_token))
            .field("google_id_token", &redacted(&self.google_id_token))
            .field("apple_id_token", &redacted(&self.apple_id_token))
            .field(
                "apple_authorization_code",
                &redacted(&self.apple_authorization_code),
            )
            .field("consent_acknowledgments", &self.consent_acknowledgments)
            .field("device_info", &self.device_info)
            .finish()
    }
}

/// Body of `POST /auth/confirm-linking`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmLinkingRequest {
    /// Token from the `ACCOUNT_LINKING_REQUIRED` response.
    #[serde(default)]
    pub linking_token: String,

    /// Must be `"confirmed"`.
    #[serde(default)]
    pub confirmation: String,

    /// Device to bind the session to.
    #[serde(default)]
    pub device_info: Option<DeviceRegistration>,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    /// Refresh token from the previous response.
    #[serde(default)]
    pub refresh_token: String,

    /// Device the session is bound to, if the app knows it.
    #[serde(default)]
    pub device_id: Option<String>,
}

/// Per-request metadata extracted from HTTP headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Correlation ID for logs and audit events.
    pub correlation_id: String,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Client IP address.
    pub source_ip: Option<String>,
}

impl RequestContext {
    /// Creates a context with a fresh correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_id(Uuid::new_v4().to_string())
    }

    /// Creates a context with the given correlation ID.
    #[must_use]
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            user_agent: None,
            source_ip: None,
        }
    }

    /// Session metadata derived from this context.
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            user_agent: self.user_agent.clone(),
            source_ip: self.source_ip.clone(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Public view of the issued session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Public session ID.
    pub session_id: String,
    /// When the refresh token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Successful onboarding response.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingResponse {
    /// Signed access token.
    pub access_token: String,
    /// Opaque refresh token.
    pub refresh_token: String,
    /// Always `"Bearer"`.
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Whether this request created the account.
    pub is_new_user: bool,
    /// Decrypted profile.
    pub user: UserProfile,
    /// The issued session.
    pub session: SessionSummary,
    /// Registered device, when device info was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
}

impl OnboardingResponse {
    /// Builds the response from an issued session.
    #[must_use]
    pub fn from_issued(issued: IssuedSession, is_new_user: bool) -> Self {
        Self {
            session: session_summary(&issued),
            device_id: issued.device.as_ref().map(|d| d.id),
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            token_type: BEARER_TOKEN_TYPE,
            expires_in: issued.expires_in,
            is_new_user,
            user: issued.profile,
        }
    }
}

/// Successful linking confirmation response.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmLinkingResponse {
    /// Token pair and profile, as for onboarding.
    #[serde(flatten)]
    pub onboarding: OnboardingResponse,
    /// Providers that can now sign in to the account.
    pub linked_providers: Vec<AuthProvider>,
    /// Always `true`.
    pub account_linked: bool,
}

/// Successful refresh response.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    /// Signed access token.
    pub access_token: String,
    /// Replacement refresh token.
    pub refresh_token: String,
    /// Always `"Bearer"`.
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// The successor session.
    pub session: SessionSummary,
    /// Device the session is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
}

impl From<IssuedSession> for RefreshResponse {
    fn from(issued: IssuedSession) -> Self {
        Self {
            session: session_summary(&issued),
            device_id: issued.session.device_id,
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            token_type: BEARER_TOKEN_TYPE,
            expires_in: issued.expires_in,
        }
    }
}

fn session_summary(issued: &IssuedSession) -> SessionSummary {
    SessionSummary {
        session_id: issued.session.session_id.clone(),
        expires_at: issued.session.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_selection() {
        let request: OnboardingRequest = serde_json::from_value(serde_json::json!({
            "provider": "apple",
            "id_token": "generic",
            "apple_id_token": "  ",
            "google_id_token": "google"
        }))
        .unwrap();

        assert_eq!(request.token_for(AuthProvider::Apple), Some("generic"));
        assert_eq!(request.token_for(AuthProvider::Google), Some("google"));

        let empty = OnboardingRequest::default();
        assert_eq!(empty.token_for(AuthProvider::Google), None);
    }

    #[test]
    fn test_onboarding_request_parses_nested() {
        let request: OnboardingRequest = serde_json::from_value(serde_json::json!({
            "provider": "google",
            "google_id_token": "tok",
            "consent_acknowledgments": {
                "medical_disclaimers": true,
                "terms_of_service": true,
                "privacy_policy": true
            },
            "device_info": { "platform": "android", "app_installation_id": "inst-1" }
        }))
        .unwrap();

        assert!(request.consent_acknowledgments.unwrap().validate().is_ok());
        assert_eq!(request.device_info.unwrap().app_installation_id, "inst-1");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let request = OnboardingRequest {
            provider: "google".to_string(),
            google_id_token: Some("eyJsecret".to_string()),
            ..Default::default()
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("eyJsecret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_context_client_info() {
        let mut ctx = RequestContext::with_correlation_id("corr");
        ctx.user_agent = Some("CarePass/2.1 iOS".to_string());
        let info = ctx.client_info();
        assert_eq!(info.user_agent.as_deref(), Some("CarePass/2.1 iOS"));
        assert_eq!(info.source_ip, None);

        assert_ne!(RequestContext::new().correlation_id, RequestContext::new().correlation_id);
    }
}
