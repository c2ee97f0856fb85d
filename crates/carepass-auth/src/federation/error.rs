//! Provider verification errors.
//!
//! Google failures are deliberately collapsed into one code; Apple failures
//! keep one code per verification step so mobile clients can tell an expired
//! token from a misconfigured audience.

/// Apple identity token verification failures, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppleVerificationError {
    /// The token is not three base64url JSON segments.
    #[error("Apple identity token is malformed")]
    InvalidTokenStructure,

    /// The `iss` claim is not Apple.
    #[error("Apple identity token has an unexpected issuer")]
    InvalidIssuer,

    /// The `aud` claim does not match the configured client ID.
    #[error("Apple identity token was issued for another client")]
    InvalidAudience,

    /// The `exp` claim is in the past.
    #[error("Apple identity token has expired")]
    TokenExpired,

    /// Apple's public keys could not be fetched and none are cached.
    #[error("Apple public keys are unavailable")]
    KeysUnavailable,

    /// No public key matches the token's `kid`.
    #[error("No Apple public key matches the identity token")]
    PublicKeyNotFound,

    /// The RS256 signature does not verify.
    #[error("Apple identity token signature is invalid")]
    SignatureInvalid,

    /// Verification failed for another reason (bad key material, claims).
    #[error("Apple identity token could not be verified")]
    SignatureVerificationFailed,
}

impl AppleVerificationError {
    /// Returns the step code (`TOKEN_EXPIRED`, ...).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTokenStructure => "INVALID_TOKEN_STRUCTURE",
            Self::InvalidIssuer => "INVALID_ISSUER",
            Self::InvalidAudience => "INVALID_AUDIENCE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::KeysUnavailable => "APPLE_KEYS_UNAVAILABLE",
            Self::PublicKeyNotFound => "PUBLIC_KEY_NOT_FOUND",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
            Self::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
        }
    }

    /// Returns the client-visible error code (`APPLE_TOKEN_EXPIRED`, ...).
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidTokenStructure => "APPLE_INVALID_TOKEN_STRUCTURE",
            Self::InvalidIssuer => "APPLE_INVALID_ISSUER",
            Self::InvalidAudience => "APPLE_INVALID_AUDIENCE",
            Self::TokenExpired => "APPLE_TOKEN_EXPIRED",
            Self::KeysUnavailable => "APPLE_KEYS_UNAVAILABLE",
            Self::PublicKeyNotFound => "APPLE_PUBLIC_KEY_NOT_FOUND",
            Self::SignatureInvalid => "APPLE_SIGNATURE_INVALID",
            Self::SignatureVerificationFailed => "APPLE_SIGNATURE_VERIFICATION_FAILED",
        }
    }
}

/// Provider verification failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// Any Google failure: bad audience, expiry, unverified e-mail, network.
    #[error("Google ID token is invalid")]
    GoogleTokenInvalid,

    /// An Apple verification step failed.
    #[error(transparent)]
    Apple(#[from] AppleVerificationError),
}

impl VerificationError {
    /// Returns the client-visible error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::GoogleTokenInvalid => "GOOGLE_TOKEN_INVALID",
            Self::Apple(e) => e.error_code(),
        }
    }

    /// Returns `true` if the provider itself was unreachable.
    #[must_use]
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, Self::Apple(AppleVerificationError::KeysUnavailable))
    }

    /// Returns a short message suitable for display in the mobile app.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Apple(AppleVerificationError::TokenExpired) => {
                "Your Apple sign-in has expired. Please try again."
            }
            Self::Apple(AppleVerificationError::KeysUnavailable) => {
                "Sign in with Apple is temporarily unavailable. Please try again shortly."
            }
            Self::Apple(_) => "We couldn't verify your Apple sign-in. Please try again.",
            Self::GoogleTokenInvalid => "We couldn't verify your Google sign-in. Please try again.",
        }
    }
}
