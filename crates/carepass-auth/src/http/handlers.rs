//! Axum handlers for the auth endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | POST | `/auth/onboarding` | [`onboarding_handler`] |
//! | POST | `/auth/confirm-linking` | [`confirm_linking_handler`] |
//! | POST | `/auth/refresh` | [`refresh_handler`] |
//!
//! Malformed JSON bodies are answered with `INVALID_REQUEST` in the regular
//! error shape.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};

use super::context::with_correlation_id;
use crate::AuthError;
use crate::flow::{
    AuthOrchestrator, ConfirmLinkingRequest, OnboardingRequest, RefreshRequest, RequestContext,
};

/// Shared state of the auth router.
pub type AuthState = Arc<AuthOrchestrator>;

/// `POST /auth/onboarding`.
pub async fn onboarding_handler(
    State(orchestrator): State<AuthState>,
    ctx: RequestContext,
    body: Result<Json<OnboardingRequest>, JsonRejection>,
) -> Response {
    let response = match body {
        Ok(Json(request)) => orchestrator
            .onboarding(request, &ctx)
            .await
            .map(Json)
            .into_response(),
        Err(rejection) => AuthError::from(rejection).into_response(),
    };
    with_correlation_id(&ctx, response)
}

/// `POST /auth/confirm-linking`.
pub async fn confirm_linking_handler(
    State(orchestrator): State<AuthState>,
    ctx: RequestContext,
    body: Result<Json<ConfirmLinkingRequest>, JsonRejection>,
) -> Response {
    let response = match body {
        Ok(Json(request)) => orchestrator
            .confirm_linking(request, &ctx)
            .await
            .map(Json)
            .into_response(),
        Err(rejection) => AuthError::from(rejection).into_response(),
    };
    with_correlation_id(&ctx, response)
}

/// `POST /auth/refresh`.
pub async fn refresh_handler(
    State(orchestrator): State<AuthState>,
    ctx: RequestContext,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    let response = match body {
        Ok(Json(request)) => orchestrator
            .refresh(request, &ctx)
            .await
            .map(Json)
            .into_response(),
        Err(rejection) => AuthError::from(rejection).into_response(),
    };
    with_correlation_id(&ctx, response)
}
