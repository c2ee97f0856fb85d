//! Token generation and validation.
//!
//! - [`jwt`] - JWT signing service and access token claims
//! - [`refresh`] - opaque refresh tokens and their storage hashes

pub mod jwt;
pub mod refresh;

pub use jwt::{ACCESS_TOKEN_USE, AccessTokenClaims, ExpiringClaims, JwtError, JwtService};
pub use refresh::{generate_refresh_token, generate_session_id, hash_refresh_token};
