//! Account resolution and linking.
//!
//! - [`IdentityResolver`] - verified identity to existing, new or collided account
//! - [`AccountLinker`] - linking tokens and their confirmation
//! - [`ProfileVault`] - PII encryption for accounts and consents

pub mod linking;
pub mod resolver;
pub mod vault;

pub use linking::{
    AccountLinker, LINKING_CONFIRMATION, LINKING_PURPOSE, LinkOutcome, LinkingChallenge,
    LinkingClaims,
};
pub use resolver::{IdentityResolver, SignInContext, Resolution};
pub use vault::ProfileVault;
