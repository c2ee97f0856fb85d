//! End-to-end tests of the auth router against mocked Google and Apple
//! endpoints and the in-memory storage.

use std::sync::{Arc, LazyLock};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use carepass_auth::audit::{AuditAction, AuditOutcome};
use carepass_auth::{
    AuthConfig, AuthOrchestrator, AuthStorage, Clock, FixedClock, LocalKeyProvider,
    MemoryAuditSink, auth_router,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use time::macros::datetime;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_772_355_600; // 2026-03-01 09:00 UTC
const APPLE_CLIENT_ID: &str = "health.carepass.app";
const APPLE_ISSUER: &str = "https://appleid.apple.com";
const GOOGLE_CLIENT_ID: &str = "ios.apps.googleusercontent.com";
const KID: &str = "apple-flow-key";

struct AppleKey {
    encoding_key: EncodingKey,
    jwk: Value,
}

static APPLE_KEY: LazyLock<AppleKey> = LazyLock::new(|| {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let public_key = private_key.to_public_key();
    let pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
    AppleKey {
        encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
        jwk: json!({
            "kty": "RSA",
            "kid": KID,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }),
    }
});

struct TestApp {
    router: Router,
    audit: Arc<MemoryAuditSink>,
    server: MockServer,
}

async fn app() -> TestApp {
    let server = MockServer::start().await;

    let mut config = AuthConfig::default();
    config.google.tokeninfo_url = format!("{}/tokeninfo", server.uri());
    config.google.client_ids = vec![GOOGLE_CLIENT_ID.to_string()];
    config.apple.client_id = APPLE_CLIENT_ID.to_string();
    config.apple.keys_url = format!("{}/auth/keys", server.uri());
    config.apple.allow_http = true;
    config.tokens.access_token_secret = "access-secret".to_string();
    config.linking.token_secret = "linking-secret".to_string();
    config.crypto.master_keys.insert(
        "pii-v1".to_string(),
        STANDARD.encode(LocalKeyProvider::generate_key()),
    );

    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(datetime!(2026-03-01 09:00 UTC)));
    let audit = Arc::new(MemoryAuditSink::new());
    let orchestrator =
        AuthOrchestrator::from_config(&config, AuthStorage::in_memory(), clock, audit.clone())
            .unwrap();

    TestApp {
        router: auth_router(Arc::new(orchestrator)),
        audit,
        server,
    }
}

async fn mock_google(server: &MockServer, token: &str, email: &str) {
    Mock::given(method("GET"))
        .and(path("/tokeninfo"))
        .and(query_param("id_token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "aud": GOOGLE_CLIENT_ID,
            "sub": "109876543210",
            "email": email,
            "email_verified": "true",
            "exp": (NOW + 1800).to_string(),
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace"
        })))
        .mount(server)
        .await;
}

fn apple_token(claims: Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(&header, &claims, &APPLE_KEY.encoding_key).unwrap()
}

fn apple_claims(email: &str, exp: i64) -> Value {
    json!({
        "iss": APPLE_ISSUER,
        "aud": APPLE_CLIENT_ID,
        "exp": exp,
        "iat": NOW - 60,
        "sub": "001234.abcdef0987.1234",
        "email": email,
        "email_verified": "true",
        "is_private_email": "false"
    })
}

async fn post(
    app: &TestApp,
    uri: &str,
    body: impl Into<Body>,
    correlation_id: Option<&str>,
) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", "CarePass/2.1 (iPhone; iOS 19.0)")
        .header("x-forwarded-for", "203.0.113.5, 10.0.0.1");
    if let Some(id) = correlation_id {
        request = request.header("x-correlation-id", id);
    }

    let response = app
        .router
        .clone()
        .oneshot(request.body(body.into()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, json)
}

async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, _, json) = post(app, uri, body.to_string(), None).await;
    (status, json)
}

#[tokio::test]
async fn google_onboarding_creates_account() {
    let app = app().await;
    mock_google(&app.server, "google-token", "ada@example.com").await;

    let (status, headers, body) = post(
        &app,
        "/auth/onboarding",
        json!({ "provider": "google", "google_id_token": "google-token" }).to_string(),
        Some("corr-onboarding-1"),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(headers["x-correlation-id"], "corr-onboarding-1");
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["is_new_user"], true);
    assert!(Uuid::parse_str(body["user"]["user_id"].as_str().unwrap()).is_ok());
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["user"]["given_name"], "Ada");
    assert_eq!(body["user"]["auth_provider"], "google");
    assert!(body["user"].get("is_private_email").is_none());
    assert!(body["refresh_token"].as_str().is_some_and(|t| t.len() >= 43));

    let events = app.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, AuditAction::Onboarding);
    assert_eq!(events[0].outcome, AuditOutcome::Success);
    assert_eq!(events[0].is_new_user, Some(true));
    assert_eq!(events[0].correlation_id, "corr-onboarding-1");
    assert_eq!(events[0].actor, body["user"]["user_id"].as_str().unwrap());
}

#[tokio::test]
async fn google_rejection_is_generic() {
    let app = app().await;

    let (status, body) = post_json(
        &app,
        "/auth/onboarding",
        json!({ "provider": "google", "id_token": "unknown-token" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "GOOGLE_TOKEN_INVALID");
    assert!(body["user_message"].as_str().is_some());
}

#[tokio::test]
async fn apple_expired_token_rejected_without_key_fetch() {
    let app = app().await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [] })))
        .expect(0)
        .mount(&app.server)
        .await;

    let token = apple_token(apple_claims("b@icloud.com", NOW - 60));
    let (status, body) = post_json(
        &app,
        "/auth/onboarding",
        json!({
            "provider": "apple",
            "apple_id_token": token,
            "apple_authorization_code": "c0de"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "APPLE_TOKEN_EXPIRED");

    let events = app.audit.events();
    assert_eq!(events[0].outcome, AuditOutcome::Failure);
    assert_eq!(events[0].error_code, Some("APPLE_TOKEN_EXPIRED"));
    assert_eq!(events[0].actor, "anonymous");
}

#[tokio::test]
async fn unknown_refresh_token_rejected() {
    let app = app().await;

    let (status, headers, body) = post(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": "not-a-real-token" }).to_string(),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "INVALID_REFRESH_TOKEN");
    assert!(headers.contains_key("x-correlation-id"));
}

#[tokio::test]
async fn malformed_body_is_invalid_request() {
    let app = app().await;

    let (status, _, body) = post(&app, "/auth/onboarding", "{not json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_REQUEST");

    let (status, body) = post_json(
        &app,
        "/auth/onboarding",
        json!({ "provider": "facebook", "id_token": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_PROVIDER");
}

#[tokio::test]
async fn missing_required_consent_rejected() {
    let app = app().await;
    mock_google(&app.server, "google-token", "ada@example.com").await;

    let (status, body) = post_json(
        &app,
        "/auth/onboarding",
        json!({
            "provider": "google",
            "google_id_token": "google-token",
            "consent_acknowledgments": {
                "medical_disclaimers": true,
                "terms_of_service": false,
                "privacy_policy": true
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "CONSENT_REQUIRED");
}

#[tokio::test]
async fn apple_sign_in_links_to_google_account() {
    let app = app().await;
    mock_google(&app.server, "google-token", "a@x.com").await;
    Mock::given(method("GET"))
        .and(path("/auth/keys"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "keys": [APPLE_KEY.jwk.clone()] })),
        )
        .mount(&app.server)
        .await;

    let (status, google) = post_json(
        &app,
        "/auth/onboarding",
        json!({ "provider": "google", "google_id_token": "google-token" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let user_id = google["user"]["user_id"].as_str().unwrap().to_string();

    let apple_token = apple_token(apple_claims("A@X.com", NOW + 600));
    let (status, conflict) = post_json(
        &app,
        "/auth/onboarding",
        json!({ "provider": "apple", "id_token": apple_token }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{conflict}");
    assert_eq!(conflict["error_code"], "ACCOUNT_LINKING_REQUIRED");
    assert_eq!(conflict["expires_in"], 300);
    assert_eq!(conflict["details"]["existing_provider"], "google");
    let linking_token = conflict["linking_token"].as_str().unwrap().to_string();

    let (status, rejected) = post_json(
        &app,
        "/auth/confirm-linking",
        json!({ "linking_token": linking_token, "confirmation": "yes" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected["error_code"], "INVALID_CONFIRMATION");

    let (status, linked) = post_json(
        &app,
        "/auth/confirm-linking",
        json!({
            "linking_token": linking_token,
            "confirmation": "confirmed",
            "device_info": { "platform": "ios", "app_installation_id": "install-42" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{linked}");
    assert_eq!(linked["account_linked"], true);
    assert_eq!(linked["linked_providers"], json!(["google", "apple"]));
    assert_eq!(linked["user"]["user_id"], user_id.as_str());
    assert_eq!(linked["is_new_user"], false);
    assert!(linked["device_id"].as_str().is_some());

    let (status, apple) = post_json(
        &app,
        "/auth/onboarding",
        json!({ "provider": "apple", "apple_id_token": apple_token }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(apple["user"]["user_id"], user_id.as_str());
    assert_eq!(apple["is_new_user"], false);
}

#[tokio::test]
async fn malformed_linking_token_gets_generic_message() {
    let app = app().await;

    let (status, body) = post_json(
        &app,
        "/auth/confirm-linking",
        json!({ "linking_token": "not.a.jwt", "confirmation": "confirmed" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "LINKING_TOKEN_INVALID");
    assert_eq!(body["message"], "Linking token is invalid or expired");
    let text = body.to_string();
    assert!(!text.contains("Base64"));
    assert!(!text.contains("decode"));
}

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = app().await;
    mock_google(&app.server, "google-token", "ada@example.com").await;

    let (_, signed_in) = post_json(
        &app,
        "/auth/onboarding",
        json!({
            "provider": "google",
            "google_id_token": "google-token",
            "device_info": { "platform": "android", "app_installation_id": "install-7" }
        }),
    )
    .await;
    let refresh_token = signed_in["refresh_token"].as_str().unwrap().to_string();
    let device_id = signed_in["device_id"].as_str().unwrap().to_string();

    let (status, wrong_device) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": refresh_token, "device_id": Uuid::new_v4() }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_device["error_code"], "INVALID_REFRESH_TOKEN");

    let (status, refreshed) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": refresh_token, "device_id": device_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{refreshed}");
    assert_eq!(refreshed["token_type"], "Bearer");
    assert_ne!(refreshed["refresh_token"], signed_in["refresh_token"]);
    assert_ne!(
        refreshed["session"]["session_id"],
        signed_in["session"]["session_id"]
    );
    assert_eq!(refreshed["session"]["expires_at"], "2026-03-08T09:00:00Z");

    let (status, reused) = post_json(
        &app,
        "/auth/refresh",
        json!({ "refresh_token": refresh_token }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reused["error_code"], "INVALID_REFRESH_TOKEN");

    let next = refreshed["refresh_token"].as_str().unwrap();
    let (status, _) = post_json(&app, "/auth/refresh", json!({ "refresh_token": next })).await;
    assert_eq!(status, StatusCode::OK);
}
