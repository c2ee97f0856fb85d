//! HTTP surface of the auth flows.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use carepass_auth::http::auth_router;
//!
//! let app = axum::Router::new().merge(auth_router(Arc::new(orchestrator)));
//! ```

pub mod context;
pub mod error;
pub mod handlers;

use axum::{Router, routing::post};

pub use context::{CORRELATION_ID_HEADER, REQUEST_ID_HEADER, client_ip, with_correlation_id};
pub use error::ErrorBody;
pub use handlers::{AuthState, confirm_linking_handler, onboarding_handler, refresh_handler};

/// Routes `/auth/onboarding`, `/auth/confirm-linking` and `/auth/refresh`.
pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/auth/onboarding", post(onboarding_handler))
        .route("/auth/confirm-linking", post(confirm_linking_handler))
        .route("/auth/refresh", post(refresh_handler))
        .with_state(state)
}
