//! Google ID token verification via token introspection.
//!
//! The token is sent to Google's `tokeninfo` endpoint; the returned claims
//! are then checked locally:
//!
//! - `aud` must be one of the configured client IDs (web, Android, iOS)
//! - `exp` must be in the future
//! - `email_verified` must be true
//!
//! Every failure, including transport errors, surfaces as the single
//! [`VerificationError::GoogleTokenInvalid`]. The concrete reason is only
//! logged at debug level.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;

use super::{AuthProvider, OAuthIdentity, VerificationError};
use crate::clock::Clock;

/// Claims returned by the `tokeninfo` endpoint.
///
/// Google returns most values as strings (`"exp": "1700000000"`,
/// `"email_verified": "true"`); both string and native JSON forms are
/// accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokenInfo {
    /// Audience (OAuth client ID the token was issued to).
    pub aud: String,
    /// Subject identifier.
    pub sub: String,
    /// E-mail address.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether Google verified the e-mail address.
    #[serde(default, deserialize_with = "deserialize_flexible_bool")]
    pub email_verified: bool,
    /// Expiry, seconds since epoch.
    #[serde(deserialize_with = "deserialize_flexible_i64")]
    pub exp: i64,
    /// Full name.
    #[serde(default)]
    pub name: Option<String>,
    /// Given name.
    #[serde(default)]
    pub given_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub family_name: Option<String>,
    /// Profile picture URL.
    #[serde(default)]
    pub picture: Option<String>,
}

/// Why a Google token was rejected. Never shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GoogleRejection {
    /// The token string was empty.
    #[error("empty token")]
    EmptyToken,
    /// Introspection request failed.
    #[error("network error: {0}")]
    Network(String),
    /// Introspection returned a non-success status.
    #[error("tokeninfo returned status {0}")]
    Status(u16),
    /// Introspection response could not be parsed.
    #[error("unparseable tokeninfo response: {0}")]
    Parse(String),
    /// `aud` is not a configured client ID.
    #[error("audience not accepted")]
    AudienceMismatch,
    /// `exp` is not in the future.
    #[error("token expired")]
    Expired,
    /// `email_verified` is false.
    #[error("email not verified")]
    EmailNotVerified,
    /// No e-mail claim.
    #[error("email claim missing")]
    MissingEmail,
}

/// Verifies Google ID tokens.
pub struct GoogleVerifier {
    http_client: reqwest::Client,
    tokeninfo_url: Url,
    client_ids: HashSet<String>,
    clock: Arc<dyn Clock>,
}

impl GoogleVerifier {
    /// Creates a verifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        tokeninfo_url: Url,
        client_ids: impl IntoIterator<Item = String>,
        request_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            tokeninfo_url,
            client_ids: client_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            clock,
        })
    }

    /// Verifies `id_token` and returns the asserted identity.
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError::GoogleTokenInvalid`] for any failure.
    pub async fn verify(&self, id_token: &str) -> Result<OAuthIdentity, VerificationError> {
        match self.introspect(id_token).await {
            Ok(identity) => {
                tracing::debug!("Google ID token verified");
                Ok(identity)
            }
            Err(reason) => {
                tracing::debug!(reason = %reason, "Google ID token rejected");
                Err(VerificationError::GoogleTokenInvalid)
            }
        }
    }

    async fn introspect(&self, id_token: &str) -> Result<OAuthIdentity, GoogleRejection> {
        let id_token = id_token.trim();
        if id_token.is_empty() {
            return Err(GoogleRejection::EmptyToken);
        }

        let response = self
            .http_client
            .get(self.tokeninfo_url.as_str())
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| GoogleRejection::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GoogleRejection::Status(response.status().as_u16()));
        }

        let info: GoogleTokenInfo = response
            .json()
            .await
            .map_err(|e| GoogleRejection::Parse(e.to_string()))?;

        self.validate(info)
    }

    /// Checks introspected claims against the configured client IDs and the clock.
    ///
    /// # Errors
    ///
    /// Returns the first violated condition.
    pub fn validate(&self, info: GoogleTokenInfo) -> Result<OAuthIdentity, GoogleRejection> {
        if !self.client_ids.contains(&info.aud) {
            return Err(GoogleRejection::AudienceMismatch);
        }

        if info.exp <= self.clock.now().unix_timestamp() {
            return Err(GoogleRejection::Expired);
        }

        if !info.email_verified {
            return Err(GoogleRejection::EmailNotVerified);
        }

        let email = info
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(GoogleRejection::MissingEmail)?;

        Ok(OAuthIdentity {
            provider: AuthProvider::Google,
            subject_id: info.sub,
            email,
            email_verified: true,
            display_name: info.name,
            given_name: info.given_name,
            family_name: info.family_name,
            is_private_email: None,
            picture_url: info.picture,
            auth_time: None,
        })
    }
}

/// Accepts `true`/`false` and their string forms; anything else is false.
fn deserialize_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Accepts integers and numeric strings.
fn deserialize_flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("exp is not an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom("exp is not numeric")),
        _ => Err(serde::de::Error::custom("exp has an unsupported type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NOW: i64 = 1_772_355_600; // 2026-03-01 09:00 UTC

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(datetime!(2026-03-01 09:00 UTC)))
    }

    fn verifier(url: &str) -> GoogleVerifier {
        GoogleVerifier::new(
            Url::parse(url).unwrap(),
            vec![
                "web.apps.googleusercontent.com".to_string(),
                "ios.apps.googleusercontent.com".to_string(),
            ],
            Duration::from_secs(2),
            clock(),
        )
        .unwrap()
    }

    fn token_info(overrides: Value) -> GoogleTokenInfo {
        let mut base = json!({
            "aud": "ios.apps.googleusercontent.com",
            "sub": "1098765",
            "email": "a@x.com",
            "email_verified": "true",
            "exp": (NOW + 600).to_string(),
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace"
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut base, overrides) {
            base.extend(extra);
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_validate_accepts_any_configured_audience() {
        let verifier = verifier("https://oauth2.googleapis.com/tokeninfo");
        let identity = verifier.validate(token_info(json!({}))).unwrap();
        assert_eq!(identity.provider, AuthProvider::Google);
        assert_eq!(identity.subject_id, "1098765");
        assert_eq!(identity.email, "a@x.com");
        assert_eq!(identity.given_name.as_deref(), Some("Ada"));
        assert_eq!(identity.is_private_email, None);

        let web = token_info(json!({"aud": "web.apps.googleusercontent.com"}));
        assert!(verifier.validate(web).is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        let verifier = verifier("https://oauth2.googleapis.com/tokeninfo");
        assert_eq!(
            verifier
                .validate(token_info(json!({"aud": "other-app"})))
                .unwrap_err(),
            GoogleRejection::AudienceMismatch
        );
        assert_eq!(
            verifier
                .validate(token_info(json!({"exp": NOW})))
                .unwrap_err(),
            GoogleRejection::Expired
        );
        assert_eq!(
            verifier
                .validate(token_info(json!({"email_verified": false})))
                .unwrap_err(),
            GoogleRejection::EmailNotVerified
        );
        assert_eq!(
            verifier
                .validate(token_info(json!({"email_verified": "false"})))
                .unwrap_err(),
            GoogleRejection::EmailNotVerified
        );
        assert_eq!(
            verifier
                .validate(token_info(json!({"email": null})))
                .unwrap_err(),
            GoogleRejection::MissingEmail
        );
    }

    #[test]
    fn test_flexible_claim_types() {
        let info = token_info(json!({"email_verified": true, "exp": NOW + 10}));
        assert!(info.email_verified);
        assert_eq!(info.exp, NOW + 10);

        let info = token_info(json!({"email_verified": "TRUE"}));
        assert!(info.email_verified);

        let info = token_info(json!({"email_verified": 1}));
        assert!(!info.email_verified);

        let bad: Result<GoogleTokenInfo, _> = serde_json::from_value(json!({
            "aud": "a", "sub": "b", "exp": "soon"
        }));
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_verify_against_tokeninfo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .and(query_param("id_token", "good-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "aud": "web.apps.googleusercontent.com",
                "sub": "42",
                "email": "b@y.com",
                "email_verified": "true",
                "exp": (NOW + 3600).to_string()
            })))
            .mount(&server)
            .await;

        let verifier = verifier(&format!("{}/tokeninfo", server.uri()));
        let identity = verifier.verify("good-token").await.unwrap();
        assert_eq!(identity.subject_id, "42");
        assert_eq!(identity.email, "b@y.com");
        assert_eq!(identity.display_name, None);
    }

    #[tokio::test]
    async fn test_verify_collapses_upstream_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokeninfo"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_token"
            })))
            .mount(&server)
            .await;

        let verifier = verifier(&format!("{}/tokeninfo", server.uri()));
        assert_eq!(
            verifier.verify("bad-token").await.unwrap_err(),
            VerificationError::GoogleTokenInvalid
        );
        assert_eq!(
            verifier.verify("   ").await.unwrap_err(),
            VerificationError::GoogleTokenInvalid
        );
    }

    #[tokio::test]
    async fn test_verify_network_failure() {
        let verifier = verifier("http://127.0.0.1:9/tokeninfo");
        assert_eq!(
            verifier.verify("token").await.unwrap_err(),
            VerificationError::GoogleTokenInvalid
        );
    }
}
