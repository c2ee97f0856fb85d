//! JWT signing and verification.
//!
//! Access tokens are signed with HS256 by default, or RS256 when a PEM key
//! pair is configured. Linking tokens always use HS256 with their own secret.
//!
//! Expiry is never checked by `jsonwebtoken` itself: callers pass the
//! current time from their [`Clock`](crate::clock::Clock) so expiry is
//! testable.
//!
//! ## Example
//!
//! ```ignore
//! use carepass_auth::token::jwt::JwtService;
//!
//! let jwt = JwtService::hs256(b"secret", "carepass")?;
//! let token = jwt.encode(&claims)?;
//! let claims: AccessTokenClaims = jwt.decode(&token, clock.now())?;
//! ```

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected (as opposed to a
    /// server-side key or encoding problem).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::DecodingError { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims carrying an expiry checked by [`JwtService::decode`].
pub trait ExpiringClaims {
    /// Expiration time (Unix timestamp).
    fn expires_at(&self) -> i64;
}

/// `token_use` value of access tokens.
pub const ACCESS_TOKEN_USE: &str = "access";

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID).
    pub sub: String,

    /// User ID, duplicated for clients that do not read `sub`.
    pub user_id: String,

    /// E-mail address.
    pub email: String,

    /// Display name.
    pub name: String,

    /// Session the token belongs to.
    pub session_id: String,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// JWT ID.
    pub jti: String,

    /// Always [`ACCESS_TOKEN_USE`].
    pub token_use: String,
}

impl ExpiringClaims for AccessTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Service for encoding and decoding JWT tokens.
///
/// This service is thread-safe (`Send + Sync`) and can be shared across
/// async tasks.
pub struct JwtService {
    algorithm: Algorithm,
    kid: Option<String>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    /// Creates an HS256 service.
    ///
    /// # Errors
    /// Returns an error if `secret` is empty.
    pub fn hs256(secret: &[u8], issuer: impl Into<String>) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::invalid_key("HMAC secret must not be empty"));
        }

        Ok(Self {
            algorithm: Algorithm::HS256,
            kid: None,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
        })
    }

    /// Creates an RS256 service from PEM strings.
    ///
    /// # Arguments
    /// * `kid` - Key ID placed in the token header
    /// * `private_pem` - PEM-encoded private key
    /// * `public_pem` - PEM-encoded public key
    /// * `issuer` - The issuer claim value
    ///
    /// # Errors
    /// Returns an error if the PEM data is invalid.
    pub fn rs256_from_pem(
        kid: Option<String>,
        private_pem: &str,
        public_pem: &str,
        issuer: impl Into<String>,
    ) -> Result<Self, JwtError> {
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            algorithm: Algorithm::RS256,
            kid,
            encoding_key,
            decoding_key,
            issuer: issuer.into(),
        })
    }

    /// Encodes claims into a JWT string.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.algorithm);
        header.kid.clone_from(&self.kid);

        encode(&header, claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes a JWT, verifying signature and issuer, and rejects it if it
    /// has expired at `now`.
    ///
    /// # Errors
    /// Returns an error if decoding or validation fails.
    pub fn decode<T>(&self, token: &str, now: OffsetDateTime) -> Result<T, JwtError>
    where
        T: DeserializeOwned + ExpiringClaims,
    {
        let claims = self.decode_ignoring_expiry::<T>(token)?;
        if claims.expires_at() <= now.unix_timestamp() {
            return Err(JwtError::Expired);
        }
        Ok(claims)
    }

    /// Decodes a JWT without checking expiry (signature and issuer are
    /// still validated).
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    pub fn decode_ignoring_expiry<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = false;
        validation.validate_aud = false;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 09:00 UTC);

    fn claims(exp_offset: i64) -> AccessTokenClaims {
        let now = NOW.unix_timestamp();
        AccessTokenClaims {
            iss: "carepass".to_string(),
            sub: "user-1".to_string(),
            user_id: "user-1".to_string(),
            email: "a@x.com".to_string(),
            name: "Ada".to_string(),
            session_id: "sess-1".to_string(),
            iat: now,
            exp: now + exp_offset,
            jti: "jti-1".to_string(),
            token_use: ACCESS_TOKEN_USE.to_string(),
        }
    }

    #[test]
    fn test_hs256_encode_decode() {
        let service = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let token = service.encode(&claims(3600)).unwrap();

        let decoded: AccessTokenClaims = service.decode(&token, NOW).unwrap();
        assert_eq!(decoded, claims(3600));
        assert_eq!(service.algorithm(), Algorithm::HS256);
    }

    #[test]
    fn test_expired_token() {
        let service = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let token = service.encode(&claims(3600)).unwrap();

        let later = NOW + time::Duration::hours(1);
        let result = service.decode::<AccessTokenClaims>(&token, later);
        assert!(matches!(result, Err(JwtError::Expired)));

        let decoded: AccessTokenClaims = service.decode_ignoring_expiry(&token).unwrap();
        assert_eq!(decoded.sub, "user-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let other = JwtService::hs256(b"linking-secret", "carepass").unwrap();
        let token = other.encode(&claims(3600)).unwrap();

        let result = service.decode::<AccessTokenClaims>(&token, NOW);
        assert!(matches!(result, Err(JwtError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let service = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let mut foreign = claims(3600);
        foreign.iss = "someone-else".to_string();
        let token = service.encode(&foreign).unwrap();

        let result = service.decode::<AccessTokenClaims>(&token, NOW);
        assert!(matches!(result, Err(JwtError::InvalidClaims { .. })));
    }

    #[test]
    fn test_garbage_token() {
        let service = JwtService::hs256(b"access-secret", "carepass").unwrap();
        let err = service
            .decode::<AccessTokenClaims>("not-a-jwt", NOW)
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            JwtService::hs256(b"", "carepass"),
            Err(JwtError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_rs256_from_pem() {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let service = JwtService::rs256_from_pem(
            Some("access-2026".to_string()),
            &private_pem,
            &public_pem,
            "carepass",
        )
        .unwrap();

        let token = service.encode(&claims(60)).unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("access-2026"));
        assert_eq!(header.alg, Algorithm::RS256);

        let decoded: AccessTokenClaims = service.decode(&token, NOW).unwrap();
        assert_eq!(decoded.session_id, "sess-1");
    }

    #[test]
    fn test_rs256_invalid_pem() {
        let result = JwtService::rs256_from_pem(None, "garbage", "garbage", "carepass");
        assert!(matches!(result, Err(JwtError::InvalidKey { .. })));
    }
}
