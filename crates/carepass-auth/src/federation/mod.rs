//! Federated sign-in with Google and Apple.
//!
//! - [`GoogleVerifier`] - token introspection against Google's `tokeninfo`
//! - [`AppleVerifier`] - local RS256 verification of Apple identity tokens
//! - [`AppleKeyCache`] - cached copy of Apple's public keys
//! - [`ProviderVerifier`] - dispatch over [`AuthProvider`]

pub mod apple;
pub mod error;
pub mod google;
pub mod identity;
pub mod jwks;
pub mod verifier;

pub use apple::AppleVerifier;
pub use error::{AppleVerificationError, VerificationError};
pub use google::{GoogleRejection, GoogleTokenInfo, GoogleVerifier};
pub use identity::{AuthProvider, OAuthIdentity, UnknownProvider};
pub use jwks::{
    AppleKeyCache, AppleKeyCacheConfig, AppleKeyFetcher, HttpAppleKeyFetcher, KeyCacheError,
    KeySetSnapshot,
};
pub use verifier::{IdentityVerifier, ProviderCredentials, ProviderVerifier};
