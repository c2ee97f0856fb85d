//! Sign in with Apple identity token verification.
//!
//! Verification runs in a fixed order and stops at the first failing step,
//! so each failure maps to exactly one [`AppleVerificationError`]:
//!
//! 1. structural decode (header and payload, no signature check)
//! 2. issuer
//! 3. audience
//! 4. expiry
//! 5. public key lookup by `kid` in the [`AppleKeyCache`]
//! 6. RS256 signature verification
//! 7. claim extraction
//!
//! The cheap claim checks run before any network access so that expired or
//! foreign tokens never trigger a key fetch.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use serde::Deserialize;
use serde_json::Value;

use super::jwks::AppleKeyCache;
use super::{AppleVerificationError, AuthProvider, OAuthIdentity};
use crate::clock::Clock;

type AppleResult<T> = Result<T, AppleVerificationError>;

#[derive(Debug, Deserialize)]
struct AppleTokenHeader {
    #[serde(default)]
    kid: Option<String>,
}

/// Claims of an Apple identity token.
#[derive(Debug, Clone, Deserialize)]
struct AppleClaims {
    iss: String,
    aud: Audience,
    exp: i64,
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<Value>,
    #[serde(default)]
    is_private_email: Option<Value>,
    #[serde(default)]
    auth_time: Option<i64>,
    #[serde(default)]
    name: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Single(aud) => aud == client_id,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Verifies Apple identity tokens against Apple's published keys.
pub struct AppleVerifier {
    client_id: String,
    issuer: String,
    key_cache: Arc<AppleKeyCache>,
    clock: Arc<dyn Clock>,
}

impl AppleVerifier {
    /// Creates a verifier for tokens issued to `client_id` by `issuer`.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        issuer: impl Into<String>,
        key_cache: Arc<AppleKeyCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            issuer: issuer.into(),
            key_cache,
            clock,
        }
    }

    /// Verifies `id_token` and returns the asserted identity.
    ///
    /// # Errors
    ///
    /// Returns the [`AppleVerificationError`] of the first failing step.
    pub async fn verify(&self, id_token: &str) -> AppleResult<OAuthIdentity> {
        let (header, claims) = decode_unverified(id_token.trim())?;

        if claims.iss != self.issuer {
            return Err(AppleVerificationError::InvalidIssuer);
        }

        if !claims.aud.contains(&self.client_id) {
            return Err(AppleVerificationError::InvalidAudience);
        }

        if claims.exp <= self.clock.now().unix_timestamp() {
            return Err(AppleVerificationError::TokenExpired);
        }

        let keys = self
            .key_cache
            .get_keys()
            .await
            .map_err(|_| AppleVerificationError::KeysUnavailable)?;

        let kid = header
            .kid
            .ok_or(AppleVerificationError::PublicKeyNotFound)?;
        let jwk = keys
            .find(&kid)
            .ok_or(AppleVerificationError::PublicKeyNotFound)?;

        let decoding_key = rsa_decoding_key(jwk).map_err(|reason| {
            tracing::warn!(kid = %kid, reason = %reason, "Unusable Apple public key");
            AppleVerificationError::SignatureVerificationFailed
        })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);
        // Expiry was checked against the injected clock above.
        validation.validate_exp = false;
        validation.leeway = 0;

        let verified = decode::<AppleClaims>(id_token.trim(), &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AppleVerificationError::SignatureInvalid,
                _ => {
                    tracing::debug!(error = %e, "Apple token verification failed");
                    AppleVerificationError::SignatureVerificationFailed
                }
            })?;

        if keys.stale {
            tracing::debug!(kid = %kid, "Apple token verified with stale key set");
        }

        extract_identity(verified.claims)
    }
}

/// Decodes header and payload without checking the signature.
fn decode_unverified(token: &str) -> AppleResult<(AppleTokenHeader, AppleClaims)> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments[..] else {
        return Err(AppleVerificationError::InvalidTokenStructure);
    };
    if signature.is_empty() {
        return Err(AppleVerificationError::InvalidTokenStructure);
    }

    Ok((decode_segment(header)?, decode_segment(payload)?))
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> AppleResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| AppleVerificationError::InvalidTokenStructure)?;
    serde_json::from_slice(&bytes).map_err(|_| AppleVerificationError::InvalidTokenStructure)
}

/// Builds an RS256 decoding key from an RSA JWK by way of an SPKI PEM.
fn rsa_decoding_key(jwk: &Jwk) -> Result<DecodingKey, String> {
    let AlgorithmParameters::RSA(params) = &jwk.algorithm else {
        return Err("key is not an RSA key".to_string());
    };

    let n = URL_SAFE_NO_PAD
        .decode(&params.n)
        .map_err(|e| format!("invalid modulus: {e}"))?;
    let e = URL_SAFE_NO_PAD
        .decode(&params.e)
        .map_err(|e| format!("invalid exponent: {e}"))?;

    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| e.to_string())?;
    let pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| e.to_string())?;

    DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| e.to_string())
}

fn extract_identity(claims: AppleClaims) -> AppleResult<OAuthIdentity> {
    let email = claims
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or(AppleVerificationError::InvalidTokenStructure)?;

    Ok(OAuthIdentity {
        provider: AuthProvider::Apple,
        subject_id: claims.sub,
        email,
        // Apple omits the claim on some tokens; only an explicit false counts.
        email_verified: claims.email_verified.as_ref().is_none_or(|v| !is_false(v)),
        display_name: claims.name.as_ref().and_then(full_name),
        given_name: None,
        family_name: None,
        is_private_email: Some(claims.is_private_email.as_ref().is_some_and(is_true)),
        picture_url: None,
        auth_time: claims.auth_time,
    })
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn is_false(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !*b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("false"),
        _ => false,
    }
}

/// `{"firstName": .., "lastName": ..}` joined and trimmed; empty is absent.
fn full_name(value: &Value) -> Option<String> {
    let joined = match value {
        Value::String(s) => s.clone(),
        Value::Object(parts) => {
            let part = |key: &str| parts.get(key).and_then(Value::as_str).unwrap_or_default();
            format!("{} {}", part("firstName").trim(), part("lastName").trim())
        }
        _ => return None,
    };

    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
