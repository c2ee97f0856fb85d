//! Error responses.
//!
//! Every error body has the shape
//! `{error_code, message, user_message, details?}`. A linking collision adds
//! `linking_token` and `expires_in` at the top level.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::audit::sanitize_error;
use crate::error::AuthError;

/// JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub error_code: &'static str,
    /// Technical message; generic for internal errors.
    pub message: String,
    /// Message suitable for display in the app.
    pub user_message: &'static str,
    /// Structured detail, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Linking token (`ACCOUNT_LINKING_REQUIRED` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linking_token: Option<String>,
    /// Linking token lifetime in seconds (`ACCOUNT_LINKING_REQUIRED` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl From<&AuthError> for ErrorBody {
    fn from(error: &AuthError) -> Self {
        let mut body = Self {
            error_code: error.error_code(),
            message: error.client_message(),
            user_message: error.user_message(),
            details: None,
            linking_token: None,
            expires_in: None,
        };

        if let AuthError::AccountLinkingRequired {
            linking_token,
            expires_in,
            existing_provider,
            new_provider,
        } = error
        {
            body.details = Some(json!({
                "existing_provider": existing_provider,
                "new_provider": new_provider,
            }));
            body.linking_token = Some(linking_token.clone());
            body.expires_in = Some(*expires_in);
        }

        body
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                error_code = self.error_code(),
                category = %self.category(),
                error = %sanitize_error(&self.to_string()),
                "Auth request failed"
            );
        } else {
            tracing::debug!(
                error_code = self.error_code(),
                category = %self.category(),
                "Auth request rejected"
            );
        }

        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::AuthProvider;
    use axum::body::to_bytes;

    async fn body_json(error: AuthError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_linking_required_body() {
        let (status, body) = body_json(AuthError::AccountLinkingRequired {
            linking_token: "link.tok.en".to_string(),
            expires_in: 300,
            existing_provider: AuthProvider::Google,
            new_provider: AuthProvider::Apple,
        })
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "ACCOUNT_LINKING_REQUIRED");
        assert_eq!(body["linking_token"], "link.tok.en");
        assert_eq!(body["expires_in"], 300);
        assert_eq!(body["details"]["existing_provider"], "google");
        assert_eq!(body["details"]["new_provider"], "apple");
        assert!(body["user_message"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_internal_error_body_is_generic() {
        let (status, body) = body_json(AuthError::storage("relation users does not exist")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error_code"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "An internal error occurred");
        assert!(body.get("details").is_none());
        assert!(body.get("linking_token").is_none());
    }

    #[tokio::test]
    async fn test_refresh_error_body() {
        let (status, body) = body_json(AuthError::InvalidRefreshToken).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "INVALID_REFRESH_TOKEN");
    }
}
