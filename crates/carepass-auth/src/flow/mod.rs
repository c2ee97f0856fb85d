//! Endpoint flows.
//!
//! - [`AuthOrchestrator`] - onboarding, linking confirmation and refresh
//! - [`types`] - request and response bodies

pub mod orchestrator;
pub mod types;

pub use orchestrator::AuthOrchestrator;
pub use types::{
    BEARER_TOKEN_TYPE, ConfirmLinkingRequest, ConfirmLinkingResponse, OnboardingRequest,
    OnboardingResponse, RefreshRequest, RefreshResponse, RequestContext, SessionSummary,
};
