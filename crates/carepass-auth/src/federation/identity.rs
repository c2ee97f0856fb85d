//! Normalised provider identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Google Sign-In.
    Google,
    /// Sign in with Apple.
    Apple,
}

impl AuthProvider {
    /// Returns the wire name of the provider.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Apple => "apple",
        }
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for AuthProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "apple" => Ok(Self::Apple),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Identity asserted by a provider after successful verification.
///
/// Produced per request and never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    /// Provider that asserted the identity.
    pub provider: AuthProvider,
    /// Stable subject identifier at the provider (`sub`).
    pub subject_id: String,
    /// E-mail address as asserted by the provider.
    pub email: String,
    /// Whether the provider verified the e-mail address.
    pub email_verified: bool,
    /// Full display name, when the provider shares one.
    pub display_name: Option<String>,
    /// Given name (Google only).
    pub given_name: Option<String>,
    /// Family name (Google only).
    pub family_name: Option<String>,
    /// Apple private relay address flag (Apple only).
    pub is_private_email: Option<bool>,
    /// Profile picture URL (Google only).
    pub picture_url: Option<String>,
    /// Time of authentication at the provider, seconds since epoch.
    pub auth_time: Option<i64>,
}

impl OAuthIdentity {
    /// Returns the part of the e-mail address before `@`.
    #[must_use]
    pub fn email_local_part(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }

    /// Display name, falling back to the e-mail local part.
    #[must_use]
    pub fn resolved_name(&self) -> String {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.email_local_part())
            .to_string()
    }
}
