//! # carepass-auth
//!
//! Federated sign-in, account linking and session issuance for the CarePass
//! mobile backend.
//!
//! This crate provides:
//! - Google and Apple identity token verification
//! - A cached copy of Apple's signing keys
//! - Field-level PII encryption with deterministic lookup hashes
//! - Account resolution and cross-provider linking
//! - Access/refresh token issuance with rotation
//! - Audit events for every flow
//!
//! ## Overview
//!
//! ```text
//! AuthOrchestrator ─► ProviderVerifier (+ AppleKeyCache)
//!                  ─► IdentityResolver (+ AccountLinker)
//!                  ─► SessionIssuer (+ CryptoEnvelope for PII at rest)
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Auth configuration
//! - [`federation`] - Provider token verification and the Apple key cache
//! - [`crypto`] - Envelope encryption and searchable hashes
//! - [`account`] - Identity resolution, linking and PII sealing
//! - [`session`] - Token pairs, rotation and revocation
//! - [`flow`] - The onboarding, linking and refresh flows
//! - [`http`] - Axum handlers for the flows
//! - [`audit`] - Audit events and error sanitization
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`token`] - JWT signing and refresh token primitives

pub mod account;
pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod federation;
pub mod flow;
pub mod http;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use account::{AccountLinker, IdentityResolver, LinkingChallenge, ProfileVault, Resolution};
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink, sanitize_error};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AuthConfig, ConfigError};
pub use crypto::{CryptoEnvelope, CryptoError, KeyProvider, LocalKeyProvider, hash_email};
pub use error::{AuthError, ErrorCategory};
pub use federation::{AuthProvider, IdentityVerifier, OAuthIdentity, VerificationError};
pub use flow::{AuthOrchestrator, RequestContext};
pub use http::auth_router;
pub use session::{ClientInfo, IssuedSession, SessionIssuer};
pub use storage::{
    AuthStorage, ConsentStorage, DeviceStorage, InMemoryAuthStorage, SessionStorage, UserStorage,
};

/// Type alias for auth results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use carepass_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{AuditSink, TracingAuditSink};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::flow::{AuthOrchestrator, RequestContext};
    pub use crate::http::auth_router;
    pub use crate::storage::{
        AuthStorage, ConsentStorage, DeviceStorage, SessionStorage, UserStorage,
    };
    pub use crate::types::{
        AccountStatus, ConsentRecord, Device, DeviceRegistration, LinkedIdentity, Session, User,
    };
}
