//! Provider dispatch.

use async_trait::async_trait;

use super::{AppleVerifier, AuthProvider, GoogleVerifier, OAuthIdentity, VerificationError};

/// Credentials presented by the mobile client.
#[derive(Clone)]
pub struct ProviderCredentials {
    /// Provider that issued `token`.
    pub provider: AuthProvider,
    /// Google ID token or Apple identity token.
    pub token: String,
    /// Apple authorization code, if the client sent one.
    pub auth_code: Option<String>,
}

impl ProviderCredentials {
    /// Creates credentials without an authorization code.
    #[must_use]
    pub fn new(provider: AuthProvider, token: impl Into<String>) -> Self {
        Self {
            provider,
            token: token.into(),
            auth_code: None,
        }
    }

    /// Attaches an authorization code.
    #[must_use]
    pub fn with_auth_code(mut self, code: Option<String>) -> Self {
        self.auth_code = code.filter(|c| !c.trim().is_empty());
        self
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("token", &"[REDACTED]")
            .field("auth_code", &self.auth_code.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Verifies provider credentials and yields a normalised identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `credentials`.
    ///
    /// # Errors
    ///
    /// Returns the provider-specific [`VerificationError`].
    async fn verify(
        &self,
        credentials: &ProviderCredentials,
    ) -> Result<OAuthIdentity, VerificationError>;
}

/// Production verifier dispatching to Google or Apple.
pub struct ProviderVerifier {
    google: GoogleVerifier,
    apple: AppleVerifier,
}

impl ProviderVerifier {
    /// Creates a dispatcher over both provider verifiers.
    #[must_use]
    pub fn new(google: GoogleVerifier, apple: AppleVerifier) -> Self {
        Self { google, apple }
    }
}

#[async_trait]
impl IdentityVerifier for ProviderVerifier {
    async fn verify(
        &self,
        credentials: &ProviderCredentials,
    ) -> Result<OAuthIdentity, VerificationError> {
        match credentials.provider {
            AuthProvider::Google => self.google.verify(&credentials.token).await,
            AuthProvider::Apple => {
                tracing::debug!(
                    auth_code_present = credentials.auth_code.is_some(),
                    "Verifying Apple identity token"
                );
                Ok(self.apple.verify(&credentials.token).await?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_tokens() {
        let credentials = ProviderCredentials::new(AuthProvider::Apple, "eyJsecret")
            .with_auth_code(Some("c0de".to_string()));
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("eyJsecret"));
        assert!(!debug.contains("c0de"));
        assert!(debug.contains("apple") || debug.contains("Apple"));
    }

    #[test]
    fn test_blank_auth_code_dropped() {
        let credentials = ProviderCredentials::new(AuthProvider::Apple, "t")
            .with_auth_code(Some("  ".to_string()));
        assert!(credentials.auth_code.is_none());
    }
}
