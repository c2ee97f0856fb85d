//! Authentication error types.
//!
//! [`AuthError`] is the single error taxonomy surfaced by the orchestrated
//! flows. Every variant maps to a stable `error_code`, an HTTP status and a
//! user-facing message; internal details never leave the process.

use std::fmt;

use crate::crypto::CryptoError;
use crate::federation::{AuthProvider, UnknownProvider, VerificationError};
use crate::token::JwtError;

/// Errors that can occur during sign-in, linking and session operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request body is malformed or fails validation.
    #[error("Invalid input ({code}): {message}")]
    InvalidInput {
        /// Stable error code (`INVALID_REQUEST`, `CONSENT_REQUIRED`, ...).
        code: &'static str,
        /// Description of what is wrong with the input.
        message: String,
    },

    /// The provider credential could not be verified.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[from] VerificationError),

    /// The identity collides with an existing account from another provider.
    #[error("Account linking required: {existing_provider} account exists for {new_provider} identity")]
    AccountLinkingRequired {
        /// Signed linking token the client must send back to confirm.
        linking_token: String,
        /// Seconds until the linking token expires.
        expires_in: u64,
        /// Primary provider of the existing account.
        existing_provider: AuthProvider,
        /// Provider the client attempted to sign in with.
        new_provider: AuthProvider,
    },

    /// The identity collides with an account that cannot be linked.
    #[error("Account conflict: {message}")]
    AccountConflict {
        /// Description of the conflict.
        message: String,
    },

    /// The linking token is malformed, forged, mis-purposed or expired.
    #[error("Linking token invalid: {message}")]
    LinkingTokenInvalid {
        /// Description of why the token was rejected.
        message: String,
    },

    /// The refresh token is unknown, revoked, expired or bound to another device.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// The account exists but is not active.
    #[error("Account deactivated")]
    AccountDeactivated,

    /// The requested entity does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Stable error code (`USER_NOT_FOUND`, `SESSION_NOT_FOUND`).
        code: &'static str,
        /// What was looked up.
        resource: String,
    },

    /// An error occurred while storing or retrieving auth data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// Field encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidInput` error with the generic `INVALID_REQUEST` code.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::invalid_input("INVALID_REQUEST", message)
    }

    /// Creates a new `InvalidInput` error with a specific code.
    #[must_use]
    pub fn invalid_input(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            code,
            message: message.into(),
        }
    }

    /// Creates a new `AccountConflict` error.
    #[must_use]
    pub fn account_conflict(message: impl Into<String>) -> Self {
        Self::AccountConflict {
            message: message.into(),
        }
    }

    /// Creates a new `LinkingTokenInvalid` error.
    #[must_use]
    pub fn linking_token_invalid(message: impl Into<String>) -> Self {
        Self::LinkingTokenInvalid {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error for a user.
    #[must_use]
    pub fn user_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            code: "USER_NOT_FOUND",
            resource: format!("User {id}"),
        }
    }

    /// Creates a `NotFound` error for a session or device.
    #[must_use]
    pub fn session_not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            code: "SESSION_NOT_FOUND",
            resource: resource.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable, client-visible error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput { code, .. } => *code,
            Self::AuthenticationFailed(e) => e.error_code(),
            Self::AccountLinkingRequired { .. } => "ACCOUNT_LINKING_REQUIRED",
            Self::AccountConflict { .. } => "ACCOUNT_CONFLICT",
            Self::LinkingTokenInvalid { .. } => "LINKING_TOKEN_INVALID",
            Self::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            Self::AccountDeactivated => "ACCOUNT_DEACTIVATED",
            Self::NotFound { code, .. } => *code,
            Self::Storage { .. }
            | Self::Crypto(_)
            | Self::Configuration { .. }
            | Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::AuthenticationFailed(e) if e.is_upstream_unavailable() => 503,
            Self::AuthenticationFailed(_)
            | Self::LinkingTokenInvalid { .. }
            | Self::InvalidRefreshToken => 401,
            Self::AccountDeactivated => 403,
            Self::NotFound { .. } => 404,
            Self::AccountLinkingRequired { .. } | Self::AccountConflict { .. } => 409,
            Self::Storage { .. }
            | Self::Crypto(_)
            | Self::Configuration { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Returns the message shown to the client.
    ///
    /// Internal errors collapse to a generic message; their detail stays in
    /// logs and audit records.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::InvalidInput { message, .. } => message.clone(),
            Self::AuthenticationFailed(e) => e.to_string(),
            Self::LinkingTokenInvalid { .. } => "Linking token is invalid or expired".to_string(),
            Self::Storage { .. }
            | Self::Crypto(_)
            | Self::Configuration { .. }
            | Self::Internal { .. } => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Returns a short message suitable for display in the mobile app.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidInput { code, .. } if *code == "CONSENT_REQUIRED" => {
                "Please accept the required agreements to continue."
            }
            Self::InvalidInput { .. } => "Something was wrong with the request. Please try again.",
            Self::AuthenticationFailed(e) => e.user_message(),
            Self::AccountLinkingRequired { .. } => {
                "An account with this email already exists. Confirm to link your sign-in methods."
            }
            Self::AccountConflict { .. } => {
                "This email is already registered to another account. Please contact support."
            }
            Self::LinkingTokenInvalid { .. } => {
                "The linking request has expired. Please sign in again."
            }
            Self::InvalidRefreshToken => "Your session has expired. Please sign in again.",
            Self::AccountDeactivated => "This account has been deactivated. Please contact support.",
            Self::NotFound { .. } => "We couldn't find your account. Please sign in again.",
            Self::Storage { .. }
            | Self::Crypto(_)
            | Self::Configuration { .. }
            | Self::Internal { .. } => "Something went wrong on our side. Please try again later.",
        }
    }

    /// Returns the error category for logging and metrics.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::AuthenticationFailed(e) if e.is_upstream_unavailable() => ErrorCategory::Upstream,
            Self::AuthenticationFailed(_)
            | Self::LinkingTokenInvalid { .. }
            | Self::InvalidRefreshToken => ErrorCategory::Authentication,
            Self::AccountLinkingRequired { .. } | Self::AccountConflict { .. } => {
                ErrorCategory::Conflict
            }
            Self::AccountDeactivated => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Storage { .. }
            | Self::Crypto(_)
            | Self::Configuration { .. }
            | Self::Internal { .. } => ErrorCategory::Server,
        }
    }

    /// Returns `true` if this error is the caller's fault (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns `true` if this error is an internal failure (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        Self::internal(format!("token signing failed: {err}"))
    }
}

impl From<UnknownProvider> for AuthError {
    fn from(err: UnknownProvider) -> Self {
        Self::invalid_input("INVALID_PROVIDER", err.to_string())
    }
}

/// Categories of authentication errors for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or incomplete request data.
    Validation,
    /// Credential or token verification failures.
    Authentication,
    /// Account state forbids the action.
    Authorization,
    /// Identity collides with existing data.
    Conflict,
    /// Entity lookup failures.
    NotFound,
    /// An upstream identity provider is unreachable.
    Upstream,
    /// Storage, crypto, configuration or internal errors.
    Server,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Upstream => write!(f, "upstream"),
            Self::Server => write!(f, "server"),
        }
    }
}
